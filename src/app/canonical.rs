use url::Url;

use super::types::MISSING;

pub const DEFAULT_ORIGIN: &str = "https://www.yelp.com";

const AD_REDIRECT_MARKER: &str = "adredir";
const AD_REDIRECT_PARAM: &str = "redirect_url";
const BIZ_REDIRECT_MARKER: &str = "biz_redir";
const BIZ_REDIRECT_PARAM: &str = "url";

/// Which kind of tracking redirect a link is expected to carry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RedirectMode {
    /// Sponsored search results wrap the listing link in `adredir?redirect_url=`.
    Ad,
    /// Outbound business websites go through `biz_redir?url=`.
    Business,
}

/// Turns scraped hrefs into the stable absolute URL used as a record key.
///
/// Never fails: anything that cannot be parsed comes back as the raw value.
#[derive(Debug, Clone)]
pub struct Canonicalizer {
    origin: String,
    base: Option<Url>,
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::new(DEFAULT_ORIGIN)
    }
}

impl Canonicalizer {
    pub fn new(origin: &str) -> Self {
        let origin = origin.trim().trim_end_matches('/').to_string();
        let base = Url::parse(&origin).ok();
        Self { origin, base }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn normalize(&self, raw: Option<&str>, mode: RedirectMode) -> String {
        let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return MISSING.to_string();
        };

        match mode {
            RedirectMode::Ad => {
                if raw.contains(AD_REDIRECT_MARKER)
                    && let Some(target) = self.query_param(raw, AD_REDIRECT_PARAM)
                {
                    return target;
                }
                if raw.starts_with('/') && !raw.starts_with("//") {
                    return format!("{}{raw}", self.origin);
                }
                raw.to_string()
            }
            RedirectMode::Business => {
                if raw.contains(BIZ_REDIRECT_MARKER)
                    && let Some(target) = self.query_param(raw, BIZ_REDIRECT_PARAM)
                {
                    return target;
                }
                raw.to_string()
            }
        }
    }

    fn query_param(&self, raw: &str, name: &str) -> Option<String> {
        let parsed = match Url::parse(raw) {
            Ok(url) => url,
            Err(url::ParseError::RelativeUrlWithoutBase) => self.base.as_ref()?.join(raw).ok()?,
            Err(_) => return None,
        };

        let (_, value) = parsed.query_pairs().find(|(key, _)| key == name)?;
        // Targets arrive encoded twice; undecodable bytes keep the first pass.
        let value = match urlencoding::decode(&value) {
            Ok(decoded) => decoded.trim().to_string(),
            Err(_) => value.trim().to_string(),
        };
        Some(value).filter(|value| !value.is_empty())
    }
}
