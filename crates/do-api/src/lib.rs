//! Typed Rust client for the DigitalOcean API (v2).
//!
//! Covers the subset needed to run a single droplet:
//! account (token check), SSH keys (list, find by name),
//! droplets (create, get, delete).

mod types;

pub use types::*;
use types::{AccountResponse, DropletResponse};

const BASE_URL: &str = "https://api.digitalocean.com/v2";
const SSH_KEYS_PER_PAGE: u32 = 200;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("digitalocean api request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("digitalocean api {endpoint} returned {status}: {body}")]
    Api {
        endpoint: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Client for the DigitalOcean REST API.
#[derive(Clone)]
pub struct DoClient {
    token: String,
    base_url: String,
    http: reqwest::Client,
}

impl DoClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, BASE_URL)
    }

    /// Point the client at a different API endpoint (e.g. a local mock).
    pub fn with_base_url(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn auth(&self) -> String {
        format!("Bearer {}", self.token)
    }

    async fn check(resp: reqwest::Response, endpoint: &'static str) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                endpoint,
                status,
                body,
            });
        }
        Ok(resp)
    }

    /// Like `check` but also treats 404 as success (for delete idempotency).
    async fn check_allow_404(
        resp: reqwest::Response,
        endpoint: &'static str,
    ) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                endpoint,
                status,
                body,
            });
        }
        Ok(resp)
    }

    // ── Account ──────────────────────────────────────────────────────

    pub async fn get_account(&self) -> Result<Account> {
        let resp = self
            .http
            .get(self.url("/account"))
            .header("Authorization", self.auth())
            .send()
            .await?;

        let body: AccountResponse = Self::check(resp, "get account").await?.json().await?;
        Ok(body.account)
    }

    // ── SSH keys ─────────────────────────────────────────────────────

    pub async fn list_ssh_keys(&self, page: u32, per_page: u32) -> Result<ListSshKeysResponse> {
        let resp = self
            .http
            .get(self.url("/account/keys"))
            .header("Authorization", self.auth())
            .query(&[("page", page), ("per_page", per_page)])
            .send()
            .await?;

        Self::check(resp, "list ssh keys")
            .await?
            .json()
            .await
            .map_err(Error::from)
    }

    /// Walk every page of the account's SSH keys looking for an exact name match.
    pub async fn find_ssh_key_by_name(&self, name: &str) -> Result<Option<SshKey>> {
        let mut page = 1;
        loop {
            let listing = self.list_ssh_keys(page, SSH_KEYS_PER_PAGE).await?;
            let has_next = listing.has_next_page();

            if let Some(key) = listing.ssh_keys.into_iter().find(|k| k.name == name) {
                return Ok(Some(key));
            }
            if !has_next {
                return Ok(None);
            }
            page += 1;
        }
    }

    // ── Droplets ─────────────────────────────────────────────────────

    pub async fn create_droplet(&self, req: &CreateDropletRequest) -> Result<Droplet> {
        let resp = self
            .http
            .post(self.url("/droplets"))
            .header("Authorization", self.auth())
            .json(req)
            .send()
            .await?;

        let body: DropletResponse = Self::check(resp, "create droplet").await?.json().await?;
        Ok(body.droplet)
    }

    /// Fetch a droplet. Returns `None` if the droplet no longer exists.
    pub async fn get_droplet(&self, droplet_id: u64) -> Result<Option<Droplet>> {
        let resp = self
            .http
            .get(self.url(&format!("/droplets/{droplet_id}")))
            .header("Authorization", self.auth())
            .send()
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body: DropletResponse = Self::check(resp, "get droplet").await?.json().await?;
        Ok(Some(body.droplet))
    }

    /// Delete a droplet. Returns `false` if it was already gone.
    pub async fn delete_droplet(&self, droplet_id: u64) -> Result<bool> {
        let resp = self
            .http
            .delete(self.url(&format!("/droplets/{droplet_id}")))
            .header("Authorization", self.auth())
            .send()
            .await?;

        let resp = Self::check_allow_404(resp, "delete droplet").await?;
        Ok(resp.status() != reqwest::StatusCode::NOT_FOUND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DROPLET_JSON: &str = r#"{
        "droplet": {
            "id": 3164444,
            "name": "temp-drop-1a2b3c4",
            "memory": 2048,
            "vcpus": 2,
            "status": "active",
            "size_slug": "s-2vcpu-2gb-amd",
            "region": { "slug": "sgp1", "name": "Singapore 1" },
            "image": { "id": 6918990, "slug": "ubuntu-22-10-x64" },
            "networks": {
                "v4": [
                    { "ip_address": "10.104.0.2", "netmask": "255.255.240.0", "gateway": "", "type": "private" },
                    { "ip_address": "159.89.200.17", "netmask": "255.255.240.0", "gateway": "159.89.192.1", "type": "public" }
                ],
                "v6": []
            }
        }
    }"#;

    #[test]
    fn droplet_public_ipv4_skips_private_networks() {
        let resp: DropletResponse = serde_json::from_str(DROPLET_JSON).unwrap();
        let droplet = resp.droplet;

        assert_eq!(droplet.id, 3164444);
        assert_eq!(droplet.status, DropletStatus::Active);
        assert_eq!(droplet.public_ipv4(), Some("159.89.200.17"));
        assert_eq!(droplet.region.unwrap().slug, "sgp1");
    }

    #[test]
    fn new_droplet_has_no_address_yet() {
        let json = r#"{ "id": 7, "name": "d", "status": "new", "networks": { "v4": [] } }"#;
        let droplet: Droplet = serde_json::from_str(json).unwrap();

        assert_eq!(droplet.status, DropletStatus::New);
        assert_eq!(droplet.public_ipv4(), None);
    }

    #[test]
    fn unknown_droplet_status_does_not_fail_parsing() {
        let json = r#"{ "id": 7, "name": "d", "status": "migrating" }"#;
        let droplet: Droplet = serde_json::from_str(json).unwrap();
        assert_eq!(droplet.status, DropletStatus::Unknown);
    }

    #[test]
    fn ssh_key_listing_reports_next_page() {
        let json = r#"{
            "ssh_keys": [
                { "id": 512189, "fingerprint": "3b:16:bf:e4", "public_key": "ssh-rsa AAAA", "name": "laptop-key" }
            ],
            "links": { "pages": { "next": "https://api.digitalocean.com/v2/account/keys?page=2", "last": "https://api.digitalocean.com/v2/account/keys?page=2" } },
            "meta": { "total": 201 }
        }"#;
        let listing: ListSshKeysResponse = serde_json::from_str(json).unwrap();

        assert!(listing.has_next_page());
        assert_eq!(listing.ssh_keys[0].name, "laptop-key");
        assert_eq!(listing.meta.unwrap().total, 201);
    }

    #[test]
    fn last_ssh_key_page_has_no_next() {
        let json = r#"{ "ssh_keys": [], "links": {}, "meta": { "total": 0 } }"#;
        let listing: ListSshKeysResponse = serde_json::from_str(json).unwrap();
        assert!(!listing.has_next_page());
    }

    #[test]
    fn create_request_omits_empty_optional_fields() {
        let req = CreateDropletRequest {
            name: "temp-drop-1a2b3c4".into(),
            region: "sgp1".into(),
            size: "s-2vcpu-2gb-amd".into(),
            image: "ubuntu-22-10-x64".into(),
            ssh_keys: vec![],
            user_data: None,
            tags: vec![],
        };
        let value = serde_json::to_value(&req).unwrap();

        assert_eq!(value["image"], "ubuntu-22-10-x64");
        assert!(value.get("ssh_keys").is_none());
        assert!(value.get("user_data").is_none());
        assert!(value.get("tags").is_none());
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() {
        let client = DoClient::with_base_url("t", "http://localhost:9000/v2/");
        assert_eq!(client.url("/droplets"), "http://localhost:9000/v2/droplets");
    }

    mod http {
        use std::collections::HashMap;

        use axum::extract::{Path, Query};
        use axum::http::{HeaderMap, StatusCode};
        use axum::routing::get;
        use axum::Router;

        use super::*;

        const TOKEN: &str = "dop_v1_test";

        async fn serve(app: Router) -> DoClient {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
            DoClient::with_base_url(TOKEN, format!("http://{addr}/v2"))
        }

        fn authorized(headers: &HeaderMap) -> bool {
            headers
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == format!("Bearer {TOKEN}"))
        }

        fn droplets() -> Router {
            Router::new().route(
                "/v2/droplets/{id}",
                get(|Path(id): Path<u64>| async move {
                    match id {
                        3164444 => (StatusCode::OK, DROPLET_JSON),
                        _ => (StatusCode::NOT_FOUND, r#"{"id":"not_found"}"#),
                    }
                })
                .delete(|Path(id): Path<u64>| async move {
                    match id {
                        3164444 => StatusCode::NO_CONTENT,
                        _ => StatusCode::NOT_FOUND,
                    }
                }),
            )
        }

        #[tokio::test]
        async fn get_droplet_maps_404_to_none() {
            let client = serve(droplets()).await;

            let droplet = client.get_droplet(3164444).await.unwrap().unwrap();
            assert_eq!(droplet.public_ipv4(), Some("159.89.200.17"));
            assert!(client.get_droplet(1).await.unwrap().is_none());
        }

        #[tokio::test]
        async fn delete_droplet_reports_already_gone() {
            let client = serve(droplets()).await;

            assert!(client.delete_droplet(3164444).await.unwrap());
            assert!(!client.delete_droplet(1).await.unwrap());
        }

        #[tokio::test]
        async fn failed_calls_carry_status_and_body() {
            let app = Router::new().route(
                "/v2/account",
                get(|headers: HeaderMap| async move {
                    if authorized(&headers) {
                        (
                            StatusCode::OK,
                            r#"{"account":{"uuid":"b6fr89dbf6d9","status":"active"}}"#,
                        )
                    } else {
                        (
                            StatusCode::UNAUTHORIZED,
                            r#"{"id":"unauthorized","message":"Unable to authenticate you"}"#,
                        )
                    }
                }),
            );
            let client = serve(app).await;
            assert_eq!(client.get_account().await.unwrap().uuid, "b6fr89dbf6d9");

            let revoked = DoClient::with_base_url("revoked", client.url(""));
            match revoked.get_account().await {
                Err(Error::Api {
                    endpoint,
                    status,
                    body,
                }) => {
                    assert_eq!(endpoint, "get account");
                    assert_eq!(status, StatusCode::UNAUTHORIZED);
                    assert!(body.contains("Unable to authenticate you"));
                }
                other => panic!("expected an api error, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn ssh_key_search_walks_every_page() {
            let app = Router::new().route(
                "/v2/account/keys",
                get(|Query(query): Query<HashMap<String, String>>| async move {
                    if query.get("per_page").map(String::as_str) != Some("200") {
                        return (StatusCode::BAD_REQUEST, String::new());
                    }
                    let body = match query.get("page").map(String::as_str) {
                        Some("1") => r#"{
                            "ssh_keys": [{ "id": 1, "name": "desktop-key", "fingerprint": "aa:bb" }],
                            "links": { "pages": { "next": "/v2/account/keys?page=2" } },
                            "meta": { "total": 2 }
                        }"#,
                        _ => r#"{
                            "ssh_keys": [{ "id": 512189, "name": "laptop-key", "fingerprint": "3b:16:bf:e4" }],
                            "links": {},
                            "meta": { "total": 2 }
                        }"#,
                    };
                    (StatusCode::OK, body.to_string())
                }),
            );
            let client = serve(app).await;

            let key = client.find_ssh_key_by_name("laptop-key").await.unwrap().unwrap();
            assert_eq!(key.id, 512189);
            assert_eq!(key.fingerprint, "3b:16:bf:e4");
            assert!(client.find_ssh_key_by_name("travel-key").await.unwrap().is_none());
        }
    }
}
