use sqlx::PgPool;

/// Apply every table definition; each statement is idempotent
pub async fn init_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    tracing::info!("Initializing PostgreSQL schema...");

    for (name, statement) in STATEMENTS {
        sqlx::query(statement).execute(pool).await.inspect_err(|e| {
            tracing::error!(statement = name, error = %e, "Schema statement failed");
        })?;
    }

    tracing::info!("PostgreSQL schema ready");
    Ok(())
}

const STATEMENTS: &[(&str, &str)] = &[
    ("shop_products_tb", CREATE_SHOP_PRODUCTS_TABLE),
    ("warehouse_stored_products_tb", CREATE_WAREHOUSE_STORED_PRODUCTS_TABLE),
    ("transfer_products_tb", CREATE_TRANSFER_PRODUCTS_TABLE),
    ("idx_transfer_products_status", CREATE_TRANSFER_STATUS_INDEX),
    ("transfer_history_tb", CREATE_TRANSFER_HISTORY_TABLE),
    ("idx_transfer_history_transfer", CREATE_TRANSFER_HISTORY_INDEX),
    ("stock_operations_tb", CREATE_STOCK_OPERATIONS_TABLE),
    ("queue_messages_tb", CREATE_QUEUE_MESSAGES_TABLE),
    ("idx_queue_messages_visible", CREATE_QUEUE_VISIBLE_INDEX),
];

/// Shop-product aggregate; only the stock column is written by this crate
pub const CREATE_SHOP_PRODUCTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS shop_products_tb (
    id          BIGINT PRIMARY KEY,
    stock       BIGINT NOT NULL CHECK (stock >= 0),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const CREATE_WAREHOUSE_STORED_PRODUCTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS warehouse_stored_products_tb (
    id              BIGSERIAL PRIMARY KEY,
    shop_product_id BIGINT NOT NULL,
    warehouse_id    BIGINT NOT NULL,
    stock           BIGINT NOT NULL CHECK (stock >= 0),
    updated_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (shop_product_id, warehouse_id)
)
"#;

pub const CREATE_TRANSFER_PRODUCTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transfer_products_tb (
    transfer_id              VARCHAR(26) PRIMARY KEY,
    shop_product_id          BIGINT NOT NULL,
    stock_to_transfer        BIGINT NOT NULL CHECK (stock_to_transfer > 0),
    warehouse_id_source      BIGINT NOT NULL,
    warehouse_id_destination BIGINT NOT NULL,
    status                   SMALLINT NOT NULL,
    retry_count              INT NOT NULL DEFAULT 0,
    created_at               TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at               TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    CHECK (warehouse_id_source <> warehouse_id_destination)
)
"#;

pub const CREATE_TRANSFER_STATUS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transfer_products_status
    ON transfer_products_tb (status, updated_at)
"#;

/// Append-only; rows are never updated or deleted
pub const CREATE_TRANSFER_HISTORY_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transfer_history_tb (
    id          BIGSERIAL PRIMARY KEY,
    transfer_id VARCHAR(26) NOT NULL REFERENCES transfer_products_tb (transfer_id),
    status      SMALLINT NOT NULL,
    note        TEXT,
    created_at  TIMESTAMPTZ NOT NULL
)
"#;

pub const CREATE_TRANSFER_HISTORY_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_transfer_history_transfer
    ON transfer_history_tb (transfer_id, id)
"#;

/// Decision journal: one row per (transfer, ledger operation)
pub const CREATE_STOCK_OPERATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS stock_operations_tb (
    transfer_id     VARCHAR(26) NOT NULL,
    op_type         VARCHAR(16) NOT NULL,
    shop_product_id BIGINT NOT NULL,
    warehouse_id    BIGINT NOT NULL,
    quantity        BIGINT NOT NULL,
    result          VARCHAR(16) NOT NULL,
    observed_stock  BIGINT,
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    PRIMARY KEY (transfer_id, op_type)
)
"#;

pub const CREATE_QUEUE_MESSAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS queue_messages_tb (
    id              BIGSERIAL PRIMARY KEY,
    queue_name      VARCHAR(128) NOT NULL,
    idempotency_key VARCHAR(128) NOT NULL,
    payload         BYTEA NOT NULL,
    attempts        INT NOT NULL DEFAULT 0,
    visible_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_at      TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE (queue_name, idempotency_key)
)
"#;

pub const CREATE_QUEUE_VISIBLE_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_queue_messages_visible
    ON queue_messages_tb (queue_name, visible_at, id)
"#;
