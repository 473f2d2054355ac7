pub const CREATE_USERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id BIGSERIAL PRIMARY KEY,
    name TEXT NOT NULL DEFAULT '',
    phone TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL DEFAULT '',
    credential TEXT
);
"#;

pub const CREATE_TRIPS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS trips (
    id BIGSERIAL PRIMARY KEY,
    owner TEXT,
    status TEXT,
    start_label TEXT,
    end_label TEXT,
    distance TEXT,
    duration TEXT,
    path JSONB NOT NULL DEFAULT '[]'::jsonb,
    last_lat DOUBLE PRECISION,
    last_lng DOUBLE PRECISION,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
"#;

pub const CREATE_ZONES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS zones (
    id BIGSERIAL PRIMARY KEY,
    polygon JSONB NOT NULL DEFAULT '[]'::jsonb,
    target_km DOUBLE PRECISION,
    assigned_user TEXT
);
"#;

pub const CREATE_USER_TARGETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS user_targets (
    id BIGSERIAL PRIMARY KEY,
    user_id TEXT NOT NULL,
    lat DOUBLE PRECISION,
    lng DOUBLE PRECISION
);
"#;

pub const INSERT_TRIP: &str = r#"
INSERT INTO trips (owner, status, start_label, end_label, distance, duration, path, last_lat, last_lng)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
RETURNING *;
"#;

// Completed trips are frozen; a late live update must not touch them.
pub const UPDATE_TRIP_LIVE: &str = r#"
UPDATE trips
SET path = $2,
    last_lat = $3,
    last_lng = $4,
    distance = $5,
    duration = $6
WHERE id = $1 AND status = 'In Progress';
"#;

pub const UPDATE_TRIP_FINAL: &str = r#"
UPDATE trips
SET status = $2,
    end_label = $3,
    duration = $4,
    distance = COALESCE($5, distance),
    path = COALESCE($6, path),
    last_lat = COALESCE($7, last_lat),
    last_lng = COALESCE($8, last_lng)
WHERE id = $1;
"#;

pub const SELECT_TRIP: &str = r#"
SELECT * FROM trips WHERE id = $1;
"#;

pub const SELECT_TRIPS_BY_OWNER: &str = r#"
SELECT * FROM trips WHERE owner = $1 ORDER BY created_at DESC;
"#;

pub const SELECT_USER_BY_PHONE: &str = r#"
SELECT * FROM users
WHERE phone = $1 AND ($2::TEXT IS NULL OR credential = $2)
LIMIT 1;
"#;

pub const INSERT_USER: &str = r#"
INSERT INTO users (name, phone, email, credential)
VALUES ($1, $2, $3, $4)
RETURNING *;
"#;

pub const UPDATE_USER: &str = r#"
UPDATE users
SET name = COALESCE($2, name),
    email = COALESCE($3, email)
WHERE id = $1;
"#;

pub const SELECT_ZONES: &str = r#"
SELECT * FROM zones ORDER BY id;
"#;

pub const SELECT_USER_TARGET: &str = r#"
SELECT * FROM user_targets WHERE user_id = $1 ORDER BY id LIMIT 1;
"#;
