//! Remote pre-mined snapshots.
//!
//! The pre-mined branch of a population script fetches a SQL script that
//! recreates and populates the type's table, addressed by the pluralized
//! lowercase type name. The script's contents are opaque here; the runner
//! just replays its statements.

use crate::error::Error;

/// Where pre-mined table snapshots live.
#[async_trait::async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch the SQL script for `slug`.
    async fn fetch(&self, slug: &str) -> crate::Result<String>;
}

/// Snapshot source resolving `<base>/<slug>.sql` over HTTP.
pub struct HttpSnapshots {
    base: String,
    client: reqwest::Client,
}

impl HttpSnapshots {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn url(&self, slug: &str) -> String {
        format!("{}/{}.sql", self.base, slug)
    }
}

#[async_trait::async_trait]
impl SnapshotSource for HttpSnapshots {
    async fn fetch(&self, slug: &str) -> crate::Result<String> {
        let url = self.url(slug);
        log::info!("fetching snapshot {url}");
        let wrap = |source| Error::Snapshot { slug: slug.to_string(), source };
        let response = self.client.get(&url).send().await.map_err(wrap)?;
        let response = response.error_for_status().map_err(wrap)?;
        response.text().await.map_err(wrap)
    }
}

/// Pluralized snake-case slug for a record type name:
/// `Country` -> `countries`, `BusClass` -> `bus_classes`.
pub fn slug(name: &str) -> String {
    pluralize(&snake_case(name))
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

fn pluralize(word: &str) -> String {
    if let Some(stem) = word.strip_suffix('y') {
        if !stem.is_empty() && !stem.ends_with(['a', 'e', 'i', 'o', 'u']) {
            return format!("{stem}ies");
        }
    }
    if word.ends_with(['s', 'x', 'z']) || word.ends_with("ch") || word.ends_with("sh") {
        return format!("{word}es");
    }
    format!("{word}s")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugs_pluralize_and_lowercase() {
        assert_eq!(slug("Country"), "countries");
        assert_eq!(slug("BusClass"), "bus_classes");
        assert_eq!(slug("ComputationCarrier"), "computation_carriers");
        assert_eq!(slug("Airport"), "airports");
        assert_eq!(slug("Day"), "days");
    }

    #[test]
    fn urls_join_base_and_slug() {
        let snapshots = HttpSnapshots::new("http://data.example.com/");
        assert_eq!(snapshots.url("countries"), "http://data.example.com/countries.sql");
    }
}
