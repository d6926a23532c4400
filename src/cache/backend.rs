use async_trait::async_trait;
use std::time::Duration;

use super::error::CacheError;

/// Minimal key/value surface the cache and session layers need.
///
/// Modelled on the Redis commands of the same names so that the Redis
/// backend is a thin pass-through. Keys are full keys; prefixing is the
/// caller's job.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Short backend name for logs and health output.
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Stores a string value. `None` keeps the key until it is deleted.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), CacheError>;

    /// Returns how many of the keys existed.
    async fn del(&self, keys: &[String]) -> Result<usize, CacheError>;

    /// Remaining lifetime; `None` when the key is missing or has no expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, CacheError>;

    async fn sadd(&self, key: &str, members: &[String]) -> Result<usize, CacheError>;

    async fn srem(&self, key: &str, members: &[String]) -> Result<usize, CacheError>;

    async fn smembers(&self, key: &str) -> Result<Vec<String>, CacheError>;

    async fn scard(&self, key: &str) -> Result<usize, CacheError>;

    async fn incr(&self, key: &str) -> Result<i64, CacheError>;

    async fn decr(&self, key: &str) -> Result<i64, CacheError>;

    /// Keys matching a glob pattern (`*` and `?`).
    async fn keys(&self, pattern: &str) -> Result<Vec<String>, CacheError>;

    async fn ping(&self) -> Result<(), CacheError>;
}

/// Glob match with `*` (any run) and `?` (any one char), as Redis MATCH does.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::glob_match;

    #[test]
    fn glob_patterns() {
        assert!(glob_match("*", ""));
        assert!(glob_match("portal_cache:*", "portal_cache:user:1"));
        assert!(glob_match("resp:GET:/api/groups*", "resp:GET:/api/groups?x=1:anon"));
        assert!(glob_match("user:?", "user:7"));
        assert!(!glob_match("user:?", "user:17"));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(!glob_match("a*b*c", "aXXbYY"));
        assert!(!glob_match("session:*", "portal_cache:session:1"));
    }
}
