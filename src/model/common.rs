use uuid::Uuid;

pub type Id = String;

pub fn generate_id() -> Id {
    Uuid::new_v4().to_string()
}

/// Current time in seconds since the epoch, as stored in `ctime`/`mtime`.
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
