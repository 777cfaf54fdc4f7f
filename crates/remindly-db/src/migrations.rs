use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS subscriptions (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id     TEXT NOT NULL,
            plan_type   TEXT NOT NULL CHECK (plan_type IN ('premium', 'pro')),
            status      TEXT NOT NULL DEFAULT 'active' CHECK (status IN ('active', 'expired')),
            expires_at  TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_subscriptions_user
            ON subscriptions(user_id, status, created_at);

        CREATE TABLE IF NOT EXISTS payments (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id         TEXT NOT NULL,
            subscription_id INTEGER REFERENCES subscriptions(id),
            amount          REAL NOT NULL,
            currency        TEXT NOT NULL DEFAULT 'CNY',
            payment_method  TEXT NOT NULL,
            order_id        TEXT NOT NULL UNIQUE,
            status          TEXT NOT NULL DEFAULT 'pending'
                            CHECK (status IN ('pending', 'completed', 'failed')),
            transaction_id  TEXT,
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL,
            completed_at    TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_payments_user
            ON payments(user_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
