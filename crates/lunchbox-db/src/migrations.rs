use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS rounds (
            id                      TEXT PRIMARY KEY,
            opener_id               TEXT NOT NULL,
            status                  TEXT NOT NULL CHECK (status IN ('OPEN', 'CLOSED')),
            selected_proposal_id    TEXT,
            created_at              TEXT NOT NULL,
            closed_at               TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_rounds_status
            ON rounds(status, created_at);

        CREATE TABLE IF NOT EXISTS round_participants (
            round_id    TEXT NOT NULL REFERENCES rounds(id) ON DELETE CASCADE,
            user_id     TEXT NOT NULL,
            position    INTEGER NOT NULL,
            PRIMARY KEY (round_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS proposals (
            id              TEXT PRIMARY KEY,
            round_id        TEXT NOT NULL REFERENCES rounds(id) ON DELETE CASCADE,
            position        INTEGER NOT NULL,
            label           TEXT NOT NULL,
            location        TEXT,
            note            TEXT,
            submitted_by    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_proposals_round
            ON proposals(round_id, position);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
