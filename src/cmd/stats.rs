//! Offline weekly financial report: `lockdispatch stats`.

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};

use lockdispatch::config::DispatchConfig;
use lockdispatch::dispatch::finance::DATE_FORMAT;
use lockdispatch::dispatch::models::WeeklyFinancialStats;

pub fn cmd_stats(
    config: &DispatchConfig,
    week: Option<&str>,
    save: bool,
    json: bool,
) -> Result<()> {
    let date = match week {
        Some(s) => NaiveDate::parse_from_str(s, DATE_FORMAT)
            .with_context(|| format!("Invalid week '{}', expected YYYY-MM-DD", s))?,
        None => Utc::now().date_naive(),
    };

    let db = super::open_db(config)?;
    let stats = if save {
        db.recompute_weekly_stats(date)?
    } else {
        db.compute_weekly_stats(date)?
    };

    if json {
        let out = serde_json::to_string_pretty(&stats).context("Failed to serialize stats")?;
        println!("{}", out);
    } else {
        print_report(&stats);
    }
    if save {
        eprintln!("Saved stats for week of {}", stats.week_start);
    }
    Ok(())
}

fn print_report(stats: &WeeklyFinancialStats) {
    println!();
    println!("Week {} to {}", stats.week_start, stats.week_end);
    println!("==========================");
    println!("  Jobs completed:      {}", stats.jobs_completed);
    println!("  Revenue:             {:>10.2}", stats.total_revenue);
    println!("  Parts:               {:>10.2}", stats.parts_cost);
    println!("  Worker commissions:  {:>10.2}", stats.worker_commissions);
    println!("  Ads / partners:      {:>10.2}", stats.ads_cost);
    println!("  Total expenses:      {:>10.2}", stats.total_expenses);
    println!("  Net profit:          {:>10.2}", stats.net_profit);
    println!("  Average job value:   {:>10.2}", stats.average_job_value);
    println!("  Profit margin:       {:>9.1}%", stats.profit_margin);

    if !stats.workers.is_empty() {
        println!();
        println!("Workers:");
        for w in &stats.workers {
            println!(
                "  {:<24} {:>3} jobs  revenue {:>10.2}  commission {:>10.2}",
                w.worker_name, w.jobs_completed, w.revenue, w.commission
            );
        }
    }
    println!();
}
