mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::Value;

#[tokio::test]
async fn health_endpoint_reports_backends() -> Result<()> {
    let server = common::TestServer::start().await?;

    let res = server.client.get(server.url("/health")).send().await?;
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = res.json().await?;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
    assert_eq!(body["data"]["database"]["backend"], "memory");
    assert_eq!(body["data"]["cache"]["status"], "healthy");
    Ok(())
}

#[tokio::test]
async fn root_describes_the_service() -> Result<()> {
    let server = common::TestServer::start().await?;

    let body: Value = server.client.get(server.url("/")).send().await?.json().await?;
    assert_eq!(body["success"], true);
    assert!(body["data"]["version"].is_string());
    Ok(())
}

#[tokio::test]
async fn protected_routes_require_a_token() -> Result<()> {
    let server = common::TestServer::start().await?;

    let res = server.client.get(server.url("/api/groups")).send().await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await?;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "UNAUTHORIZED");

    let res = server
        .client
        .get(server.url("/api/groups"))
        .bearer_auth("not-a-jwt")
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn auth_cookie_is_accepted() -> Result<()> {
    let server = common::TestServer::start().await?;
    let user = server.login("TEACHER").await?;

    let res = server
        .client
        .get(server.url("/api/sessions/my"))
        .header("Cookie", format!("auth_token={}", user.token))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn catalog_lists_categories() -> Result<()> {
    let server = common::TestServer::start().await?;
    let user = server.login("STUDENT").await?;

    let body: Value = server
        .get(&user, "/api/permissions/catalog")
        .send()
        .await?
        .json()
        .await?;
    let categories = body["data"].as_array().expect("catalog array");
    assert_eq!(categories.len(), 7);
    assert_eq!(categories[0]["id"], "system");
    Ok(())
}
