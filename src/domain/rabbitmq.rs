//! RabbitMQ management API adapter

use crate::domain::ports::{BrokerPermissions, BrokerUser, BrokerUserRequest, RabbitmqAdmin};
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "rabbitmq";

/// Connection settings for the management API
#[derive(Debug, Clone)]
pub struct RabbitmqConfig {
    /// Base URL, e.g. `http://rabbitmq:15672`
    pub url: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

/// [`RabbitmqAdmin`] over the HTTP management API
#[derive(Debug, Clone)]
pub struct RabbitmqHttpAdmin {
    config: RabbitmqConfig,
    client: reqwest::Client,
}

impl RabbitmqHttpAdmin {
    pub fn new(config: RabbitmqConfig) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn url(&self, segments: &[&str]) -> String {
        api_url(&self.config.url, segments)
    }

    async fn send(
        &self,
        method: Method,
        segments: &[&str],
        body: Option<serde_json::Value>,
    ) -> Result<Option<reqwest::Response>> {
        let url = self.url(segments);
        debug!(%method, %url, "rabbitmq request");

        let mut request = self
            .client
            .request(method, &url)
            .basic_auth(&self.config.username, Some(&self.config.password));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::TOO_MANY_REQUESTS => Err(Error::Throttled {
                service: SERVICE.to_string(),
            }),
            status if status.is_success() => Ok(Some(response)),
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(Error::External {
                    service: SERVICE.to_string(),
                    reason: format!("{} {}", status, text.trim()),
                })
            }
        }
    }
}

/// Join path segments under `<base>/api`, percent-encoding each one.
///
/// The default vhost `/` becomes `%2F`.
fn api_url(base: &str, segments: &[&str]) -> String {
    let mut url = format!("{}/api", base.trim_end_matches('/'));
    for segment in segments {
        url.push('/');
        url.push_str(&urlencoding::encode(segment));
    }
    url
}

#[async_trait]
impl RabbitmqAdmin for RabbitmqHttpAdmin {
    async fn get_user(&self, name: &str) -> Result<Option<BrokerUser>> {
        match self.send(Method::GET, &["users", name], None).await? {
            Some(response) => Ok(Some(response.json().await?)),
            None => Ok(None),
        }
    }

    async fn put_user(&self, name: &str, request: &BrokerUserRequest) -> Result<()> {
        let body = serde_json::to_value(request)?;
        self.send(Method::PUT, &["users", name], Some(body)).await?;
        Ok(())
    }

    async fn delete_user(&self, name: &str) -> Result<()> {
        self.send(Method::DELETE, &["users", name], None).await?;
        Ok(())
    }

    async fn get_permissions(&self, vhost: &str, user: &str) -> Result<Option<BrokerPermissions>> {
        match self.send(Method::GET, &["permissions", vhost, user], None).await? {
            Some(response) => Ok(Some(response.json().await?)),
            None => Ok(None),
        }
    }

    async fn put_permissions(&self, vhost: &str, user: &str, permissions: &BrokerPermissions) -> Result<()> {
        let body = serde_json::to_value(permissions)?;
        self.send(Method::PUT, &["permissions", vhost, user], Some(body))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use axum::extract::Path;
    use axum::http::StatusCode as HttpStatus;
    use axum::routing::get;
    use axum::{Json, Router};

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn admin(url: String) -> RabbitmqHttpAdmin {
        RabbitmqHttpAdmin::new(RabbitmqConfig {
            url,
            username: "guest".into(),
            password: "guest".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[test]
    fn test_api_url_encodes_default_vhost() {
        assert_eq!(
            api_url("http://rmq:15672/", &["permissions", "/", "orders"]),
            "http://rmq:15672/api/permissions/%2F/orders"
        );
    }

    #[tokio::test]
    async fn test_get_user() {
        let app = Router::new().route(
            "/api/users/:name",
            get(|Path(name): Path<String>| async move {
                if name == "orders" {
                    Ok(Json(serde_json::json!({"name": "orders", "tags": "monitoring"})))
                } else {
                    Err(HttpStatus::NOT_FOUND)
                }
            }),
        );
        let admin = admin(serve(app).await);

        let user = admin.get_user("orders").await.unwrap().unwrap();
        assert_eq!(user.tags, vec!["monitoring"]);
        assert!(admin.get_user("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_get_user_with_tag_array() {
        let app = Router::new().route(
            "/api/users/:name",
            get(|| async {
                Json(serde_json::json!({
                    "name": "orders",
                    "tags": ["monitoring", "administrator"],
                    "limits": {}
                }))
            }),
        );
        let admin = admin(serve(app).await);

        let user = admin.get_user("orders").await.unwrap().unwrap();
        assert_eq!(user.tags, vec!["administrator", "monitoring"]);
        assert!(user.has_tags("monitoring,administrator"));
    }

    #[tokio::test]
    async fn test_server_errors_are_external() {
        let app = Router::new().route(
            "/api/users/:name",
            get(|| async { (HttpStatus::INTERNAL_SERVER_ERROR, "broker down") }),
        );
        let admin = admin(serve(app).await);

        let err = admin.get_user("orders").await.unwrap_err();
        assert_matches!(err, Error::External { ref service, .. } if service == "rabbitmq");
        assert!(err.to_string().contains("broker down"));
    }
}
