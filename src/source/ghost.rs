use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use url::Url;

use super::{admin_token, ContentSource, Page, SourceError, WirePost, WireTag};
use crate::config::SourceCredentials;
use crate::content::{ContentItem, Tag};

const ACCEPT_VERSION: &str = "v5.0";

/// Blocking client for the Ghost admin posts API.
pub struct GhostClient {
    site_url: Url,
    admin_api_key: String,
    client: reqwest::blocking::Client,
}

#[derive(Deserialize)]
struct PostsResponse {
    posts: Vec<WirePost>,
    #[serde(default)]
    meta: Option<Meta>,
}

#[derive(Deserialize)]
struct Meta {
    pagination: Pagination,
}

#[derive(Deserialize)]
struct Pagination {
    pages: u32,
    total: u64,
}

impl GhostClient {
    pub fn new(credentials: SourceCredentials, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;

        Ok(GhostClient {
            site_url: credentials.site_url,
            admin_api_key: credentials.admin_api_key,
            client,
        })
    }

    fn url(&self, path: &str) -> Result<Url, SourceError> {
        self.site_url
            .join(path)
            .map_err(|err| SourceError::Decode(format!("bad url {path}: {err}")))
    }

    fn authorization(&self) -> Result<String, SourceError> {
        let token = admin_token(&self.admin_api_key, chrono::Utc::now().timestamp())?;
        Ok(format!("Ghost {token}"))
    }

    fn get(&self, url: Url) -> Result<reqwest::blocking::Response, SourceError> {
        log::debug!("GET {url}");
        let resp = self
            .client
            .get(url)
            .header("Authorization", self.authorization()?)
            .header("Accept-Version", ACCEPT_VERSION)
            .send()?;
        check_status(resp)
    }

    fn posts(resp: reqwest::blocking::Response) -> Result<PostsResponse, SourceError> {
        let text = resp.text()?;
        serde_json::from_str::<PostsResponse>(&text).map_err(|err| {
            log::error!("{err}. tried to parse: {text:?}");
            SourceError::Decode(err.to_string())
        })
    }
}

fn check_status(
    resp: reqwest::blocking::Response,
) -> Result<reqwest::blocking::Response, SourceError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    Err(classify(status, resp.text().unwrap_or_default()))
}

/// Map a non-success status onto the error the reconciler acts on.
fn classify(status: StatusCode, body: String) -> SourceError {
    match status {
        StatusCode::NOT_FOUND => SourceError::NotFound,
        StatusCode::CONFLICT => SourceError::Conflict,
        _ => SourceError::Status {
            status: status.as_u16(),
            body,
        },
    }
}

impl ContentSource for GhostClient {
    fn list_page(&self, page: u32) -> Result<Page, SourceError> {
        let mut url = self.url("ghost/api/admin/posts/")?;
        url.query_pairs_mut()
            .append_pair("page", &page.to_string())
            .append_pair("formats", "mobiledoc")
            .append_pair("include", "tags");

        let parsed = Self::posts(self.get(url)?)?;
        let pagination = parsed
            .meta
            .map(|m| m.pagination)
            .ok_or_else(|| SourceError::Decode("listing without pagination".to_string()))?;

        Ok(Page {
            items: parsed.posts.into_iter().map(ContentItem::from).collect(),
            pages: pagination.pages,
            total: pagination.total,
        })
    }

    fn get_item(&self, id: &str) -> Result<ContentItem, SourceError> {
        let mut url = self.url(&format!("ghost/api/admin/posts/{id}/"))?;
        url.query_pairs_mut()
            .append_pair("formats", "mobiledoc")
            .append_pair("include", "tags");

        Self::posts(self.get(url)?)?
            .posts
            .into_iter()
            .next()
            .map(ContentItem::from)
            .ok_or(SourceError::NotFound)
    }

    fn update_tags(&self, id: &str, tags: &[Tag], version: &str) -> Result<(), SourceError> {
        let mut url = self.url(&format!("ghost/api/admin/posts/{id}/"))?;
        url.query_pairs_mut().append_pair("formats", "mobiledoc,lexical");

        let tags: Vec<WireTag> = tags
            .iter()
            .map(|t| WireTag {
                name: t.name.clone(),
                slug: t.slug.clone(),
            })
            .collect();

        log::debug!("PUT {url}");
        let resp = self
            .client
            .put(url)
            .header("Authorization", self.authorization()?)
            .header("Accept-Version", ACCEPT_VERSION)
            .json(&json!({
                "posts": [{
                    "tags": tags,
                    "updated_at": version,
                }]
            }))
            .send()?;

        check_status(resp).map(|_| ())
    }
}
