use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction};
use uuid::Uuid;

use lunchbox_types::models::{Proposal, Round, RoundStatus};

use crate::Database;
use crate::models::{ParticipantRow, ProposalRow, RoundRow};

impl Database {
    // -- Rounds --

    pub fn insert_round(&self, round: &Round) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO rounds (id, opener_id, status, selected_proposal_id, created_at, closed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    round.id.to_string(),
                    round.opener_id,
                    round.status.as_str(),
                    round.selected_proposal_id.map(|id| id.to_string()),
                    round.created_at.to_rfc3339(),
                    round.closed_at.map(|t| t.to_rfc3339()),
                ],
            )?;
            write_members(&tx, round)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Write the current state of an existing round. Participants and
    /// proposals are append-only, so rows already on disk are left alone.
    pub fn save_round(&self, round: &Round) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE rounds SET status = ?2, selected_proposal_id = ?3, closed_at = ?4 WHERE id = ?1",
                rusqlite::params![
                    round.id.to_string(),
                    round.status.as_str(),
                    round.selected_proposal_id.map(|id| id.to_string()),
                    round.closed_at.map(|t| t.to_rfc3339()),
                ],
            )?;
            if updated == 0 {
                return Err(anyhow!("Round {} is not stored", round.id));
            }
            write_members(&tx, round)?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Delete a round together with everything it owns.
    pub fn delete_round(&self, round_id: Uuid) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let deleted = conn.execute("DELETE FROM rounds WHERE id = ?1", [round_id.to_string()])?;
            Ok(deleted > 0)
        })
    }

    pub fn load_rounds(&self) -> Result<Vec<Round>> {
        self.with_conn(|conn| {
            let rounds = query_rounds(conn)?;
            let mut participants = group_by_round(query_participants(conn)?, |r| r.round_id.clone());
            let mut proposals = group_by_round(query_proposals(conn)?, |r| r.round_id.clone());

            rounds
                .into_iter()
                .map(|row| {
                    let members = participants.remove(&row.id).unwrap_or_default();
                    let owned = proposals.remove(&row.id).unwrap_or_default();
                    into_round(row, members, owned)
                })
                .collect()
        })
    }

    /// Row count straight from storage, to check cascades.
    #[cfg(test)]
    pub fn count_proposals(&self, round_id: Uuid) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM proposals WHERE round_id = ?1",
                [round_id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }
}

fn write_members(tx: &Transaction<'_>, round: &Round) -> Result<()> {
    let round_id = round.id.to_string();

    let mut stmt = tx.prepare_cached(
        "INSERT OR IGNORE INTO round_participants (round_id, user_id, position) VALUES (?1, ?2, ?3)",
    )?;
    for (position, user_id) in round.participants.iter().enumerate() {
        stmt.execute(rusqlite::params![round_id, user_id, position as i64])?;
    }

    let mut stmt = tx.prepare_cached(
        "INSERT OR IGNORE INTO proposals (id, round_id, position, label, location, note, submitted_by)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for (position, p) in round.proposals.iter().enumerate() {
        stmt.execute(rusqlite::params![
            p.id.to_string(),
            round_id,
            position as i64,
            p.label,
            p.location,
            p.note,
            p.submitted_by,
        ])?;
    }

    Ok(())
}

fn query_rounds(conn: &Connection) -> Result<Vec<RoundRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, opener_id, status, selected_proposal_id, created_at, closed_at
         FROM rounds ORDER BY created_at",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok(RoundRow {
                id: row.get(0)?,
                opener_id: row.get(1)?,
                status: row.get(2)?,
                selected_proposal_id: row.get(3)?,
                created_at: row.get(4)?,
                closed_at: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_participants(conn: &Connection) -> Result<Vec<ParticipantRow>> {
    let mut stmt =
        conn.prepare("SELECT round_id, user_id FROM round_participants ORDER BY round_id, position")?;

    let rows = stmt
        .query_map([], |row| {
            Ok(ParticipantRow {
                round_id: row.get(0)?,
                user_id: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_proposals(conn: &Connection) -> Result<Vec<ProposalRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, round_id, label, location, note, submitted_by
         FROM proposals ORDER BY round_id, position",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok(ProposalRow {
                id: row.get(0)?,
                round_id: row.get(1)?,
                label: row.get(2)?,
                location: row.get(3)?,
                note: row.get(4)?,
                submitted_by: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn group_by_round<R>(rows: Vec<R>, key: impl Fn(&R) -> String) -> HashMap<String, Vec<R>> {
    let mut grouped: HashMap<String, Vec<R>> = HashMap::new();
    for row in rows {
        grouped.entry(key(&row)).or_default().push(row);
    }
    grouped
}

fn into_round(row: RoundRow, participants: Vec<ParticipantRow>, proposals: Vec<ProposalRow>) -> Result<Round> {
    let id = parse_uuid(&row.id).with_context(|| format!("Corrupt round id '{}'", row.id))?;
    let status = RoundStatus::parse(&row.status)
        .ok_or_else(|| anyhow!("Corrupt status '{}' on round '{}'", row.status, row.id))?;

    let proposals = proposals
        .into_iter()
        .map(|p| {
            Ok(Proposal {
                id: parse_uuid(&p.id).with_context(|| format!("Corrupt proposal id '{}'", p.id))?,
                round_id: id,
                label: p.label,
                location: p.location,
                note: p.note,
                submitted_by: p.submitted_by,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(Round {
        id,
        opener_id: row.opener_id,
        status,
        participants: participants.into_iter().map(|p| p.user_id).collect(),
        proposals,
        selected_proposal_id: row.selected_proposal_id.as_deref().map(parse_uuid).transpose()?,
        created_at: parse_timestamp(&row.created_at)?,
        closed_at: row.closed_at.as_deref().map(parse_timestamp).transpose()?,
    })
}

fn parse_uuid(value: &str) -> Result<Uuid> {
    Ok(value.parse::<Uuid>()?)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    let ts = DateTime::parse_from_rfc3339(value)
        .with_context(|| format!("Corrupt timestamp '{}'", value))?;
    Ok(ts.with_timezone(&Utc))
}
