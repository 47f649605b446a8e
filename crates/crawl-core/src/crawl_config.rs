use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    #[default]
    Xhs,
    Zhihu,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Xhs => "xhs",
            Platform::Zhihu => "zhihu",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "xhs" | "xiaohongshu" => Ok(Platform::Xhs),
            "zhihu" => Ok(Platform::Zhihu),
            other => Err(format!("Unknown platform: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum CrawlMode {
    #[default]
    Search,
    Detail,
    Creator,
}

impl CrawlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlMode::Search => "search",
            CrawlMode::Detail => "detail",
            CrawlMode::Creator => "creator",
        }
    }

    pub fn requires_keywords(&self) -> bool {
        matches!(self, CrawlMode::Search)
    }
}

impl fmt::Display for CrawlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrawlMode {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "search" => Ok(CrawlMode::Search),
            "detail" => Ok(CrawlMode::Detail),
            "creator" => Ok(CrawlMode::Creator),
            other => Err(format!("Unknown crawl mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum LoginMethod {
    #[default]
    Qrcode,
    Phone,
    Cookie,
}

impl LoginMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginMethod::Qrcode => "qrcode",
            LoginMethod::Phone => "phone",
            LoginMethod::Cookie => "cookie",
        }
    }
}

impl fmt::Display for LoginMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoginMethod {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "qrcode" | "qr" => Ok(LoginMethod::Qrcode),
            "phone" => Ok(LoginMethod::Phone),
            "cookie" => Ok(LoginMethod::Cookie),
            other => Err(format!("Unknown login method: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SaveFormat {
    Csv,
    Db,
    #[default]
    Json,
    Sqlite,
    Mongodb,
    Excel,
}

impl SaveFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveFormat::Csv => "csv",
            SaveFormat::Db => "db",
            SaveFormat::Json => "json",
            SaveFormat::Sqlite => "sqlite",
            SaveFormat::Mongodb => "mongodb",
            SaveFormat::Excel => "excel",
        }
    }
}

impl fmt::Display for SaveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SaveFormat {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "csv" => Ok(SaveFormat::Csv),
            "db" => Ok(SaveFormat::Db),
            "json" => Ok(SaveFormat::Json),
            "sqlite" => Ok(SaveFormat::Sqlite),
            "mongodb" | "mongo" => Ok(SaveFormat::Mongodb),
            "excel" | "xlsx" => Ok(SaveFormat::Excel),
            other => Err(format!("Unknown save format: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("search mode requires at least one keyword")]
    MissingKeywords,
}

/// Job configuration submitted with a start command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CrawlConfig {
    pub platform: Platform,
    pub crawler_type: CrawlMode,
    pub login_type: LoginMethod,
    pub save_option: SaveFormat,
    #[serde(default)]
    pub keywords: String,
    #[serde(default)]
    pub specified_ids: String,
    #[serde(default)]
    pub creator_ids: String,
    pub start_page: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages: Option<u32>,
    pub enable_comments: bool,
    pub enable_sub_comments: bool,
    #[serde(default)]
    pub cookies: String,
    pub headless: bool,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            platform: Platform::default(),
            crawler_type: CrawlMode::default(),
            login_type: LoginMethod::default(),
            save_option: SaveFormat::default(),
            keywords: String::new(),
            specified_ids: String::new(),
            creator_ids: String::new(),
            start_page: 1,
            max_pages: None,
            enable_comments: true,
            enable_sub_comments: false,
            cookies: String::new(),
            headless: false,
        }
    }
}

impl CrawlConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.crawler_type.requires_keywords() && self.keywords.trim().is_empty() {
            return Err(ValidationError::MissingKeywords);
        }
        Ok(())
    }

    /// Wire form: keywords trimmed, a zero page cap means unlimited.
    pub fn normalized(&self) -> Self {
        let mut config = self.clone();
        config.keywords = config.keywords.trim().to_string();
        config.max_pages = config.max_pages.filter(|pages| *pages > 0);
        config.start_page = config.start_page.max(1);
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_without_keywords_is_invalid() {
        let config = CrawlConfig {
            keywords: "   ".to_string(),
            ..CrawlConfig::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::MissingKeywords));
    }

    #[test]
    fn other_modes_do_not_need_keywords() {
        for mode in [CrawlMode::Detail, CrawlMode::Creator] {
            let config = CrawlConfig {
                crawler_type: mode,
                ..CrawlConfig::default()
            };
            assert_eq!(config.validate(), Ok(()));
        }
    }

    #[test]
    fn normalized_drops_zero_page_cap_and_trims_keywords() {
        let config = CrawlConfig {
            keywords: "  coffee beans ".to_string(),
            max_pages: Some(0),
            start_page: 0,
            ..CrawlConfig::default()
        };
        let wire = serde_json::to_value(config.normalized()).expect("serialize");
        assert_eq!(wire["keywords"], "coffee beans");
        assert_eq!(wire["start_page"], 1);
        assert!(wire.get("max_pages").is_none());
        assert_eq!(wire["platform"], "xhs");
        assert_eq!(wire["crawler_type"], "search");
        assert_eq!(wire["save_option"], "json");
    }

    #[test]
    fn enum_parsing_accepts_aliases() {
        assert_eq!("XHS".parse::<Platform>(), Ok(Platform::Xhs));
        assert_eq!("qr".parse::<LoginMethod>(), Ok(LoginMethod::Qrcode));
        assert_eq!("xlsx".parse::<SaveFormat>(), Ok(SaveFormat::Excel));
        assert!("bilibili".parse::<Platform>().is_err());
    }
}
