use anyhow::{Context, Result};
use chrono::{Duration, NaiveDate};
use rusqlite::{OptionalExtension, params};

use super::{DispatchDb, JobFilter, bump_version};
use crate::dispatch::finance::{DATE_FORMAT, calculate_weekly_stats, week_start};
use crate::dispatch::models::{
    JobStatus, PartnerWeeklyCost, UserRole, WeeklyFinancialStats, WorkerEarnings,
};
use crate::errors::DispatchError;

const COST_COLUMNS: &str = "id, partner_name, week_start, amount, notes, created_at, updated_at";

const STATS_COLUMNS: &str = "week_start, week_end, jobs_completed, total_revenue, parts_cost, \
     worker_commissions, ads_cost, total_expenses, net_profit, average_job_value, \
     profit_margin, workers, computed_at";

fn cost_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PartnerWeeklyCost> {
    Ok(PartnerWeeklyCost {
        id: row.get(0)?,
        partner_name: row.get(1)?,
        week_start: row.get(2)?,
        amount: row.get(3)?,
        notes: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

struct StatsRow {
    week_start: String,
    week_end: String,
    jobs_completed: u32,
    total_revenue: f64,
    parts_cost: f64,
    worker_commissions: f64,
    ads_cost: f64,
    total_expenses: f64,
    net_profit: f64,
    average_job_value: f64,
    profit_margin: f64,
    workers: String,
    computed_at: String,
}

impl StatsRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            week_start: row.get(0)?,
            week_end: row.get(1)?,
            jobs_completed: row.get(2)?,
            total_revenue: row.get(3)?,
            parts_cost: row.get(4)?,
            worker_commissions: row.get(5)?,
            ads_cost: row.get(6)?,
            total_expenses: row.get(7)?,
            net_profit: row.get(8)?,
            average_job_value: row.get(9)?,
            profit_margin: row.get(10)?,
            workers: row.get(11)?,
            computed_at: row.get(12)?,
        })
    }

    fn into_stats(self) -> Result<WeeklyFinancialStats> {
        let workers: Vec<WorkerEarnings> = serde_json::from_str(&self.workers)
            .with_context(|| format!("Corrupt worker breakdown for week {}", self.week_start))?;
        Ok(WeeklyFinancialStats {
            week_start: self.week_start,
            week_end: self.week_end,
            jobs_completed: self.jobs_completed,
            total_revenue: self.total_revenue,
            parts_cost: self.parts_cost,
            worker_commissions: self.worker_commissions,
            ads_cost: self.ads_cost,
            total_expenses: self.total_expenses,
            net_profit: self.net_profit,
            average_job_value: self.average_job_value,
            profit_margin: self.profit_margin,
            workers,
            computed_at: self.computed_at,
        })
    }
}

impl DispatchDb {
    /// Record a partner's advertising spend for a week, replacing any
    /// existing entry for the same partner and week. `week` may be any day;
    /// it is normalized to that week's Monday.
    pub fn upsert_partner_cost(
        &self,
        partner_name: &str,
        week: NaiveDate,
        amount: f64,
        notes: Option<&str>,
    ) -> Result<PartnerWeeklyCost> {
        let partner_name = partner_name.trim();
        if partner_name.is_empty() {
            return Err(DispatchError::validation("partner_name is required").into());
        }
        if !amount.is_finite() || amount < 0.0 {
            return Err(
                DispatchError::validation("amount must be a non-negative number").into(),
            );
        }
        let week_key = week_start(week).format(DATE_FORMAT).to_string();
        self.conn
            .execute(
                "INSERT INTO partner_weekly_costs (partner_name, week_start, amount, notes)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(partner_name, week_start) DO UPDATE SET
                    amount = excluded.amount,
                    notes = excluded.notes,
                    updated_at = datetime('now')",
                params![partner_name, week_key, amount, notes],
            )
            .context("Failed to upsert partner cost")?;
        bump_version(&self.conn)?;
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM partner_weekly_costs WHERE partner_name = ?1 AND week_start = ?2",
                    COST_COLUMNS
                ),
                params![partner_name, week_key],
                cost_from_row,
            )
            .context("Partner cost not found after upsert")
    }

    /// Partner costs, newest week first, optionally limited to one week.
    pub fn list_partner_costs(&self, week: Option<NaiveDate>) -> Result<Vec<PartnerWeeklyCost>> {
        let week_key = week.map(|w| week_start(w).format(DATE_FORMAT).to_string());
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM partner_weekly_costs
                 WHERE (?1 IS NULL OR week_start = ?1)
                 ORDER BY week_start DESC, partner_name",
                COST_COLUMNS
            ))
            .context("Failed to prepare list_partner_costs")?;
        let rows = stmt
            .query_map(params![week_key], cost_from_row)
            .context("Failed to query partner costs")?;
        let mut costs = Vec::new();
        for row in rows {
            costs.push(row.context("Failed to read partner cost row")?);
        }
        Ok(costs)
    }

    pub fn delete_partner_cost(&self, id: i64) -> Result<()> {
        let count = self
            .conn
            .execute(
                "DELETE FROM partner_weekly_costs WHERE id = ?1",
                params![id],
            )
            .context("Failed to delete partner cost")?;
        if count == 0 {
            return Err(DispatchError::PartnerCostNotFound { id }.into());
        }
        bump_version(&self.conn)?;
        Ok(())
    }

    /// Compute live stats for the week containing `week` from current data.
    pub fn compute_weekly_stats(&self, week: NaiveDate) -> Result<WeeklyFinancialStats> {
        let start = week_start(week);
        let next = start + Duration::days(7);
        let jobs = self.list_jobs(&JobFilter {
            status: Some(JobStatus::Completed),
            completed_from: Some(start.format(DATE_FORMAT).to_string()),
            completed_before: Some(next.format(DATE_FORMAT).to_string()),
            ..JobFilter::default()
        })?;
        let costs = self.list_partner_costs(Some(start))?;
        let workers = self.list_users(Some(UserRole::Worker), true)?;
        Ok(calculate_weekly_stats(start, &jobs, &costs, &workers))
    }

    /// Persist a computed snapshot, replacing any earlier one for the week.
    pub fn save_weekly_stats(&self, stats: &WeeklyFinancialStats) -> Result<()> {
        let workers =
            serde_json::to_string(&stats.workers).context("Failed to serialize breakdown")?;
        self.conn
            .execute(
                &format!(
                    "INSERT OR REPLACE INTO financial_stats ({})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    STATS_COLUMNS
                ),
                params![
                    stats.week_start,
                    stats.week_end,
                    stats.jobs_completed,
                    stats.total_revenue,
                    stats.parts_cost,
                    stats.worker_commissions,
                    stats.ads_cost,
                    stats.total_expenses,
                    stats.net_profit,
                    stats.average_job_value,
                    stats.profit_margin,
                    workers,
                    stats.computed_at
                ],
            )
            .context("Failed to save weekly stats")?;
        bump_version(&self.conn)?;
        Ok(())
    }

    /// Compute and persist in one step.
    pub fn recompute_weekly_stats(&self, week: NaiveDate) -> Result<WeeklyFinancialStats> {
        let stats = self.compute_weekly_stats(week)?;
        self.save_weekly_stats(&stats)?;
        Ok(stats)
    }

    pub fn get_saved_stats(&self, week: NaiveDate) -> Result<Option<WeeklyFinancialStats>> {
        let key = week_start(week).format(DATE_FORMAT).to_string();
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM financial_stats WHERE week_start = ?1",
                    STATS_COLUMNS
                ),
                params![key],
                StatsRow::from_row,
            )
            .optional()
            .context("Failed to query saved stats")?;
        row.map(StatsRow::into_stats).transpose()
    }

    /// Saved snapshots, most recent week first.
    pub fn stats_history(&self, limit: u32) -> Result<Vec<WeeklyFinancialStats>> {
        let mut stmt = self
            .conn
            .prepare(&format!(
                "SELECT {} FROM financial_stats ORDER BY week_start DESC LIMIT ?1",
                STATS_COLUMNS
            ))
            .context("Failed to prepare stats_history")?;
        let rows = stmt
            .query_map(params![limit], StatsRow::from_row)
            .context("Failed to query stats history")?;
        let mut history = Vec::new();
        for row in rows {
            history.push(row.context("Failed to read stats row")?.into_stats()?);
        }
        Ok(history)
    }
}
