mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{json, Value};

use common::{TestServer, TestUser};

async fn create_group(server: &TestServer, admin: &TestUser, name: &str, institution: &str) -> Result<String> {
    let res = server
        .post(admin, "/api/groups")
        .json(&json!({ "name": name, "institution_id": institution }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await?;
    Ok(body["data"]["id"].as_str().expect("group id").to_string())
}

async fn check(server: &TestServer, caller: &TestUser, user: &TestUser, query: &str) -> Result<Value> {
    let res = server
        .get(caller, &format!("/api/users/{}/permissions/check?{}", user.user_id, query))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    Ok(body["data"].clone())
}

#[tokio::test]
async fn direct_beats_group_beats_role_with_global_fallback() -> Result<()> {
    let server = TestServer::start().await?;
    let admin = server.login("SYSTEM_ADMIN").await?;
    let teacher = server.login("TEACHER").await?;

    // Role default at global.
    let resolution = check(&server, &teacher, &teacher, "permission_key=canManageGrades&institution_id=7").await?;
    assert_eq!(resolution["allowed"], true);
    assert_eq!(resolution["source"], "role");
    assert_eq!(resolution["fell_back"], true);

    // A group deny at the institution overrides the role.
    let group_id = create_group(&server, &admin, "Sem notas", "7").await?;
    let res = server
        .post(&admin, &format!("/api/groups/{}/members", group_id))
        .json(&json!({ "user_id": teacher.user_id }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CREATED);
    let res = server
        .put(&admin, &format!("/api/groups/{}/permissions", group_id))
        .json(&json!({
            "permission_key": "canManageGrades",
            "allowed": false,
            "context_type": "institution",
            "context_id": "7"
        }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let resolution = check(&server, &teacher, &teacher, "permission_key=canManageGrades&institution_id=7").await?;
    assert_eq!(resolution["allowed"], false);
    assert_eq!(resolution["source"], "group");
    assert_eq!(resolution["fell_back"], false);

    // A direct allow overrides the group.
    let res = server
        .put(&admin, &format!("/api/users/{}/permissions/contextual", teacher.user_id))
        .json(&json!({
            "permission_key": "canManageGrades",
            "allowed": true,
            "context_type": "institution",
            "context_id": "7"
        }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let resolution = check(&server, &teacher, &teacher, "permission_key=canManageGrades&institution_id=7").await?;
    assert_eq!(resolution["allowed"], true);
    assert_eq!(resolution["source"], "direct");

    // Another institution has nothing stored and falls back to the role.
    let resolution = check(&server, &teacher, &teacher, "permission_key=canManageGrades&institution_id=8").await?;
    assert_eq!(resolution["allowed"], true);
    assert_eq!(resolution["source"], "role");
    Ok(())
}

#[tokio::test]
async fn unknown_permission_keys_are_rejected() -> Result<()> {
    let server = TestServer::start().await?;
    let teacher = server.login("TEACHER").await?;

    let res = server
        .get(&teacher, &format!("/api/users/{}/permissions/check?permission_key=canFly", teacher.user_id))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await?;
    assert_eq!(body["code"], "VALIDATION_ERROR");
    Ok(())
}

#[tokio::test]
async fn reading_other_users_requires_management_permission() -> Result<()> {
    let server = TestServer::start().await?;
    let student = server.login("STUDENT").await?;
    let other = server.login("STUDENT").await?;
    let manager = server.login("INSTITUTION_MANAGER").await?;

    let own = server
        .get(&student, &format!("/api/users/{}/permissions/effective", student.user_id))
        .send()
        .await?;
    assert_eq!(own.status(), StatusCode::OK);
    let body: Value = own.json().await?;
    assert_eq!(body["data"]["canViewOwnGrades"]["allowed"], true);
    assert_eq!(body["data"]["canManageSystem"]["allowed"], false);

    let res = server
        .get(&student, &format!("/api/users/{}/permissions/effective", other.user_id))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = server
        .get(&manager, &format!("/api/users/{}/permissions/effective?institution_id=3", other.user_id))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn group_management_is_guarded() -> Result<()> {
    let server = TestServer::start().await?;
    let coordinator = server.login("COORDINATOR").await?;

    let res = server
        .post(&coordinator, "/api/groups")
        .json(&json!({ "name": "Coordenação", "institution_id": "1" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: Value = res.json().await?;
    assert_eq!(body["code"], "FORBIDDEN");
    Ok(())
}

#[tokio::test]
async fn group_matrix_clone_and_stats() -> Result<()> {
    let server = TestServer::start().await?;
    let admin = server.login("SYSTEM_ADMIN").await?;
    let group_id = create_group(&server, &admin, "Professores", "2").await?;

    let res = server
        .post(&admin, &format!("/api/groups/{}/permissions/bulk", group_id))
        .json(&json!({ "permissions": [
            { "permission_key": "canManageAttendance", "allowed": true, "context_type": "school", "context_id": "20" },
            { "permission_key": "canViewPayments", "allowed": false }
        ]}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = server
        .get(&admin, &format!("/api/groups/{}/permissions/matrix", group_id))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(body["data"]["canManageAttendance"]["schools"]["20"], true);
    assert_eq!(body["data"]["canViewPayments"]["global"], false);
    assert!(body["data"]["canManageGrades"]["global"].is_null());

    let res = server
        .post(&admin, &format!("/api/groups/{}/clone", group_id))
        .json(&json!({ "name": "Professores (cópia)" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CREATED);
    let clone: Value = res.json().await?;
    assert_eq!(clone["data"]["institution_id"], "2");
    let clone_id = clone["data"]["id"].as_str().expect("clone id");

    let grants: Value = server
        .get(&admin, &format!("/api/groups/{}/permissions", clone_id))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(grants["data"].as_array().map(Vec::len), Some(2));

    let stats: Value = server
        .get(&admin, "/api/groups/stats?institution_id=2")
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(stats["data"]["total_groups"], 2);
    assert_eq!(stats["data"]["total_members"], 0);
    Ok(())
}

#[tokio::test]
async fn role_grants_require_system_admin() -> Result<()> {
    let server = TestServer::start().await?;
    let admin = server.login("SYSTEM_ADMIN").await?;
    let manager = server.login("INSTITUTION_MANAGER").await?;
    let guardian = server.login("GUARDIAN").await?;

    let grant = json!({ "permission_key": "canViewBoletos", "allowed": false });
    let res = server.put(&manager, "/api/roles/guardian/permissions").json(&grant).send().await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = server.put(&admin, "/api/roles/guardian/permissions").json(&grant).send().await?;
    assert_eq!(res.status(), StatusCode::OK);

    let resolution = check(&server, &guardian, &guardian, "permission_key=canViewBoletos").await?;
    assert_eq!(resolution["allowed"], false);
    assert_eq!(resolution["source"], "role");
    Ok(())
}

#[tokio::test]
async fn group_grants_cannot_reach_beyond_the_callers_scope() -> Result<()> {
    let server = TestServer::start().await?;
    let admin = server.login("SYSTEM_ADMIN").await?;
    let teacher = server.login("TEACHER").await?;

    let res = server
        .put(&admin, &format!("/api/users/{}/permissions/contextual", teacher.user_id))
        .json(&json!({
            "permission_key": "canManageInstitutionUsers",
            "allowed": true,
            "context_type": "institution",
            "context_id": "7"
        }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let group_id = create_group(&server, &teacher, "Equipe 7", "7").await?;
    let res = server
        .post(&teacher, &format!("/api/groups/{}/members", group_id))
        .json(&json!({ "user_id": teacher.user_id }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CREATED);

    let path = format!("/api/groups/{}/permissions", group_id);
    for key in ["canManageInstitutionUsers", "canManageSystem"] {
        let res = server
            .put(&teacher, &path)
            .json(&json!({ "permission_key": key, "allowed": true }))
            .send()
            .await?;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    let res = server
        .post(&teacher, &format!("{}/bulk", path))
        .json(&json!({ "permissions": [
            { "permission_key": "canManageAttendance", "allowed": true, "context_type": "institution", "context_id": "7" },
            { "permission_key": "canManageSystem", "allowed": true }
        ]}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = server
        .delete(&teacher, &format!("{}?permission_key=canManageSystem&context_type=global", path))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // The group's own scope is still manageable.
    let res = server
        .put(&teacher, &path)
        .json(&json!({
            "permission_key": "canManageAttendance",
            "allowed": true,
            "context_type": "institution",
            "context_id": "7"
        }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let res = server
        .post(&teacher, "/api/groups")
        .json(&json!({ "name": "Outra", "institution_id": "99" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn roles_listing_includes_stored_grants() -> Result<()> {
    let server = TestServer::start().await?;
    let admin = server.login("SYSTEM_ADMIN").await?;

    let teacher_entry = |body: &Value| {
        body["data"]
            .as_array()
            .and_then(|roles| roles.iter().find(|r| r["role"] == "TEACHER"))
            .cloned()
            .unwrap_or(Value::Null)
    };

    let before: Value = server.get(&admin, "/api/roles").send().await?.json().await?;
    assert_eq!(teacher_entry(&before)["grants"], json!([]));

    let res = server
        .put(&admin, "/api/roles/TEACHER/permissions")
        .json(&json!({ "permission_key": "canViewPayments", "allowed": true }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let after: Value = server.get(&admin, "/api/roles").send().await?.json().await?;
    let teacher = teacher_entry(&after);
    let grants = teacher["grants"].as_array().cloned().unwrap_or_default();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0]["permission_key"], "canViewPayments");
    assert_eq!(grants[0]["allowed"], true);
    assert!(teacher["allowed"]
        .as_array()
        .is_some_and(|keys| !keys.iter().any(|k| k == "canViewPayments")));
    Ok(())
}

#[tokio::test]
async fn deactivating_a_group_drops_its_grants() -> Result<()> {
    let server = TestServer::start().await?;
    let admin = server.login("SYSTEM_ADMIN").await?;
    let teacher = server.login("TEACHER").await?;

    let group_id = create_group(&server, &admin, "Financeiro", "7").await?;
    let res = server
        .post(&admin, &format!("/api/groups/{}/members", group_id))
        .json(&json!({ "user_id": teacher.user_id }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::CREATED);
    let res = server
        .put(&admin, &format!("/api/groups/{}/permissions", group_id))
        .json(&json!({ "permission_key": "canViewPayments", "allowed": true }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);

    let resolution = check(&server, &teacher, &teacher, "permission_key=canViewPayments").await?;
    assert_eq!(resolution["allowed"], true);
    assert_eq!(resolution["source"], "group");

    let res = server
        .put(&admin, &format!("/api/groups/{}", group_id))
        .json(&json!({ "is_active": false, "description": "Arquivado" }))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await?;
    assert_eq!(body["data"]["is_active"], false);
    assert_eq!(body["data"]["name"], "Financeiro");
    assert_eq!(body["data"]["description"], "Arquivado");

    let resolution = check(&server, &teacher, &teacher, "permission_key=canViewPayments").await?;
    assert_eq!(resolution["allowed"], false);

    let stats: Value = server
        .get(&admin, "/api/groups/stats?institution_id=7")
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(stats["data"]["active_groups"], 0);

    let res = server
        .put(&admin, &format!("/api/groups/{}", group_id))
        .json(&json!({}))
        .send()
        .await?;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

