mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{json, Value};

use edu_portal_api::config::AppConfig;

use common::{cache_outcome, TestServer};

#[tokio::test]
async fn get_responses_are_cached_per_user() -> Result<()> {
    let server = TestServer::start().await?;
    let admin = server.login("SYSTEM_ADMIN").await?;
    let other_admin = server.login("SYSTEM_ADMIN").await?;

    let first = server.get(&admin, "/api/groups?b=2&a=1").send().await?;
    assert_eq!(first.status(), StatusCode::OK);
    assert_eq!(cache_outcome(&first).as_deref(), Some("MISS"));
    let first_body: Value = first.json().await?;

    // Same query in a different order hits the same entry.
    let second = server.get(&admin, "/api/groups?a=1&b=2").send().await?;
    assert_eq!(cache_outcome(&second).as_deref(), Some("HIT"));
    assert!(second
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json")));
    let second_body: Value = second.json().await?;
    assert_eq!(first_body, second_body);

    // Another caller never sees the first caller's entry.
    let other = server.get(&other_admin, "/api/groups?a=1&b=2").send().await?;
    assert_eq!(cache_outcome(&other).as_deref(), Some("MISS"));
    Ok(())
}

#[tokio::test]
async fn successful_mutations_invalidate_resource_tags() -> Result<()> {
    let server = TestServer::start().await?;
    let admin = server.login("SYSTEM_ADMIN").await?;

    let res = server.get(&admin, "/api/groups").send().await?;
    assert_eq!(cache_outcome(&res).as_deref(), Some("MISS"));
    let res = server.get(&admin, "/api/groups").send().await?;
    assert_eq!(cache_outcome(&res).as_deref(), Some("HIT"));

    let res = server
        .post(&admin, "/api/groups")
        .json(&json!({ "name": "Monitores" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = server.get(&admin, "/api/groups").send().await?;
    assert_eq!(cache_outcome(&res).as_deref(), Some("MISS"));
    let body: Value = res.json().await?;
    assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
    assert_eq!(body["data"][0]["name"], "Monitores");
    Ok(())
}

#[tokio::test]
async fn failed_mutations_keep_cached_entries() -> Result<()> {
    let server = TestServer::start().await?;
    let admin = server.login("SYSTEM_ADMIN").await?;

    server.get(&admin, "/api/groups").send().await?;

    let res = server
        .post(&admin, "/api/groups")
        .json(&json!({ "name": "   " }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = server.get(&admin, "/api/groups").send().await?;
    assert_eq!(cache_outcome(&res).as_deref(), Some("HIT"));
    Ok(())
}

#[tokio::test]
async fn no_cache_requests_and_session_routes_bypass() -> Result<()> {
    let server = TestServer::start().await?;
    let admin = server.login("SYSTEM_ADMIN").await?;

    let res = server
        .get(&admin, "/api/groups")
        .header("Cache-Control", "no-cache")
        .send()
        .await?;
    assert_eq!(cache_outcome(&res).as_deref(), Some("BYPASS"));
    let res = server.get(&admin, "/api/groups").send().await?;
    assert_eq!(cache_outcome(&res).as_deref(), Some("MISS"));

    for _ in 0..2 {
        let res = server.get(&admin, "/api/sessions/my").send().await?;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(cache_outcome(&res).as_deref(), Some("BYPASS"));
    }
    Ok(())
}

#[tokio::test]
async fn errors_are_not_cached() -> Result<()> {
    let server = TestServer::start().await?;
    let teacher = server.login("TEACHER").await?;

    for _ in 0..2 {
        let res = server.get(&teacher, "/api/groups").send().await?;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(cache_outcome(&res).as_deref(), Some("MISS"));
    }
    Ok(())
}

#[tokio::test]
async fn cache_admin_routes() -> Result<()> {
    let server = TestServer::start().await?;
    let admin = server.login("SYSTEM_ADMIN").await?;
    let manager = server.login("INSTITUTION_MANAGER").await?;

    server.get(&admin, "/api/groups").send().await?;

    let res = server.post(&manager, "/api/cache/clear").send().await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let stats: Value = server.get(&manager, "/api/cache/stats").send().await?.json().await?;
    assert_eq!(stats["data"]["backend"], "memory");
    assert!(stats["data"]["sets"].as_u64().unwrap_or(0) >= 1);

    let res = server
        .post(&admin, "/api/cache/invalidate")
        .json(&json!({ "tag": "groups" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    assert!(body["data"]["removed"].as_u64().unwrap_or(0) >= 1);

    let res = server
        .post(&admin, "/api/cache/invalidate")
        .json(&json!({}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = server.post(&admin, "/api/cache/clear").send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    let res = server.get(&admin, "/api/groups").send().await?;
    assert_eq!(cache_outcome(&res).as_deref(), Some("MISS"));
    Ok(())
}

#[tokio::test]
async fn bodies_over_the_limit_are_not_stored() -> Result<()> {
    let mut config = AppConfig::development();
    config.cache.max_body_bytes = 16;
    let server = TestServer::start_with(config).await?;
    let admin = server.login("SYSTEM_ADMIN").await?;

    for _ in 0..2 {
        let res = server.get(&admin, "/api/groups").send().await?;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(cache_outcome(&res).as_deref(), Some("MISS"));
        let body: Value = res.json().await?;
        assert_eq!(body["success"], true);
    }
    Ok(())
}

#[tokio::test]
async fn head_requests_are_cached_apart_from_get() -> Result<()> {
    let server = TestServer::start().await?;
    let admin = server.login("SYSTEM_ADMIN").await?;

    let head = || server.client.head(server.url("/api/groups")).bearer_auth(&admin.token);
    let res = head().send().await?;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(cache_outcome(&res).as_deref(), Some("MISS"));
    let res = head().send().await?;
    assert_eq!(cache_outcome(&res).as_deref(), Some("HIT"));

    let res = server.get(&admin, "/api/groups").send().await?;
    assert_eq!(cache_outcome(&res).as_deref(), Some("MISS"));
    let body: Value = res.json().await?;
    assert_eq!(body["data"], json!([]));
    Ok(())
}
