use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub host: String,
    pub media_paths: Vec<String>,
    pub db_path: String,
    pub batch_size: usize,
    pub exiftool_path: String,
    pub geocode_endpoint: String,
    pub geocode_key: String,
    pub geocode_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Config {
            port: env::var("GEO_PIX_PORT")
                .unwrap_or_else(|_| "18090".to_string())
                .parse()?,
            host: env::var("GEO_PIX_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            media_paths: env::var("GEO_PIX_MEDIA_PATHS")
                .unwrap_or_else(|_| "./media".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            db_path: env::var("GEO_PIX_DB_PATH")
                .unwrap_or_else(|_| "./data/geo-pix.db".to_string()),
            // Batch size balances exiftool spawn overhead against argument
            // list length; 500 suits spinning disks, smaller is fine on SSDs.
            batch_size: env::var("GEO_PIX_BATCH_SIZE")
                .unwrap_or_else(|_| "500".to_string())
                .parse()?,
            exiftool_path: env::var("GEO_PIX_EXIFTOOL_PATH")
                .unwrap_or_else(|_| "exiftool".to_string()),
            geocode_endpoint: env::var("GEO_PIX_GEOCODE_ENDPOINT")
                .unwrap_or_else(|_| "https://restapi.amap.com/v3/geocode/regeo".to_string()),
            geocode_key: env::var("GEO_PIX_GEOCODE_KEY").unwrap_or_default(),
            geocode_timeout_secs: env::var("GEO_PIX_GEOCODE_TIMEOUT_SECS")
                .unwrap_or_else(|_| "3".to_string())
                .parse()?,
        })
    }
}
