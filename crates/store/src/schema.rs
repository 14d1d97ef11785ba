pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS resource (
  id TEXT PRIMARY KEY,
  service_name TEXT NOT NULL,
  service_namespace TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS span (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  start_time TIMESTAMP NOT NULL,
  duration_ns BIGINT NOT NULL,
  trace_id TEXT NOT NULL,
  kind TEXT NOT NULL,
  parent_span_id TEXT,
  status_code TEXT NOT NULL,
  status_message TEXT,
  attributes TEXT NOT NULL,
  resource_id TEXT NOT NULL
);

CREATE SEQUENCE IF NOT EXISTS log_id_seq;

CREATE TABLE IF NOT EXISTS log (
  id BIGINT PRIMARY KEY,
  span_id TEXT,
  body TEXT NOT NULL,
  "timestamp" TIMESTAMP NOT NULL,
  severity_number INTEGER NOT NULL,
  severity_text TEXT NOT NULL,
  resource_id TEXT NOT NULL,
  attributes TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_span_trace ON span(trace_id);
CREATE INDEX IF NOT EXISTS idx_span_parent ON span(parent_span_id);
CREATE INDEX IF NOT EXISTS idx_span_resource ON span(resource_id);
CREATE INDEX IF NOT EXISTS idx_log_span ON log(span_id);
"#;
