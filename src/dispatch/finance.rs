//! Weekly financial aggregation.
//!
//! Weeks run Monday through Sunday. Stats are a plain reduce over the
//! completed jobs and partner (advertising) costs that fall inside the week;
//! rounding to cents happens once, after summing.

use std::collections::HashMap;

use chrono::{Datelike, Duration, NaiveDate, Utc};

use super::models::{
    Job, JobStatus, PartnerWeeklyCost, TIMESTAMP_FORMAT, User, WeeklyFinancialStats,
    WorkerEarnings,
};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Monday of the calendar week containing `date`.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

/// Sunday closing the week that starts on `start`.
pub fn week_end(start: NaiveDate) -> NaiveDate {
    start + Duration::days(6)
}

/// Round half away from zero to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.get(..10)?, DATE_FORMAT).ok()
}

/// Calendar day a completed job counts towards.
pub fn completion_date(job: &Job) -> Option<NaiveDate> {
    job.completed_at.as_deref().and_then(parse_date)
}

#[derive(Default)]
struct WorkerTotals {
    jobs: u32,
    revenue: f64,
    commission: f64,
}

/// Aggregate the week beginning on the Monday of `week`.
///
/// `jobs` and `partner_costs` may span any range; only records inside the
/// week are counted. `workers` supplies display names for the breakdown.
pub fn calculate_weekly_stats(
    week: NaiveDate,
    jobs: &[Job],
    partner_costs: &[PartnerWeeklyCost],
    workers: &[User],
) -> WeeklyFinancialStats {
    let start = week_start(week);
    let end = week_end(start);

    let mut jobs_completed = 0u32;
    let mut revenue = 0.0;
    let mut parts = 0.0;
    let mut commissions = 0.0;
    let mut per_worker: HashMap<i64, WorkerTotals> = HashMap::new();

    for job in jobs.iter().filter(|j| j.status == JobStatus::Completed) {
        let Some(day) = completion_date(job) else {
            continue;
        };
        if day < start || day > end {
            continue;
        }
        let amount = job.total_amount.unwrap_or(0.0);
        let commission = job.commission_amount.unwrap_or(0.0);

        jobs_completed += 1;
        revenue += amount;
        parts += job.parts_cost.unwrap_or(0.0);
        commissions += commission;

        if let Some(worker_id) = job.worker_id {
            let totals = per_worker.entry(worker_id).or_default();
            totals.jobs += 1;
            totals.revenue += amount;
            totals.commission += commission;
        }
    }

    let week_key = start.format(DATE_FORMAT).to_string();
    let ads: f64 = partner_costs
        .iter()
        .filter(|c| parse_date(&c.week_start).map(week_start) == Some(start))
        .map(|c| c.amount)
        .sum();

    let expenses = parts + commissions + ads;
    let profit = revenue - expenses;
    let average = if jobs_completed > 0 {
        revenue / f64::from(jobs_completed)
    } else {
        0.0
    };
    let margin = if revenue > 0.0 {
        profit / revenue * 100.0
    } else {
        0.0
    };

    let mut breakdown: Vec<WorkerEarnings> = per_worker
        .into_iter()
        .map(|(worker_id, t)| WorkerEarnings {
            worker_id,
            worker_name: workers
                .iter()
                .find(|w| w.id == worker_id)
                .map(|w| w.name.clone())
                .unwrap_or_else(|| format!("worker #{}", worker_id)),
            jobs_completed: t.jobs,
            revenue: round2(t.revenue),
            commission: round2(t.commission),
        })
        .collect();
    breakdown.sort_by(|a, b| {
        b.revenue
            .total_cmp(&a.revenue)
            .then(a.worker_id.cmp(&b.worker_id))
    });

    WeeklyFinancialStats {
        week_start: week_key,
        week_end: end.format(DATE_FORMAT).to_string(),
        jobs_completed,
        total_revenue: round2(revenue),
        parts_cost: round2(parts),
        worker_commissions: round2(commissions),
        ads_cost: round2(ads),
        total_expenses: round2(expenses),
        net_profit: round2(profit),
        average_job_value: round2(average),
        profit_margin: round2(margin),
        workers: breakdown,
        computed_at: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
    }
}

/// Earnings of a single worker for the week containing `week`.
pub fn worker_week_earnings(week: NaiveDate, worker: &User, jobs: &[Job]) -> WorkerEarnings {
    let stats = calculate_weekly_stats(week, jobs, &[], std::slice::from_ref(worker));
    stats
        .workers
        .into_iter()
        .find(|w| w.worker_id == worker.id)
        .unwrap_or(WorkerEarnings {
            worker_id: worker.id,
            worker_name: worker.name.clone(),
            jobs_completed: 0,
            revenue: 0.0,
            commission: 0.0,
        })
}
