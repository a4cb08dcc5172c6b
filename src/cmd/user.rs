//! User administration: `lockdispatch user`.

use anyhow::{Context, Result};

use lockdispatch::config::DispatchConfig;
use lockdispatch::dispatch::db::NewUser;
use lockdispatch::dispatch::models::UserRole;

use super::super::UserCommands;

fn parse_role(role: &str) -> Result<UserRole> {
    role.parse::<UserRole>().map_err(anyhow::Error::msg)
}

pub fn cmd_user(config: &DispatchConfig, command: UserCommands) -> Result<()> {
    let db = super::open_db(config)?;

    match command {
        UserCommands::Create {
            name,
            email,
            role,
            password,
            phone,
            commission_rate,
        } => {
            let user = db.create_user(&NewUser {
                name,
                email,
                phone,
                role: parse_role(&role)?,
                commission_rate,
                password,
            })?;
            println!(
                "Created {} {} <{}> (id {})",
                user.role, user.name, user.email, user.id
            );
        }
        UserCommands::List { role, all, json } => {
            let role = role.as_deref().map(parse_role).transpose()?;
            let users = db.list_users(role, all)?;
            if json {
                let out = serde_json::to_string_pretty(&users)
                    .context("Failed to serialize users")?;
                println!("{}", out);
                return Ok(());
            }
            if users.is_empty() {
                println!("No users found.");
                return Ok(());
            }
            println!(
                "{:<5} {:<7} {:<24} {:<32} {:>6}  {}",
                "ID", "ROLE", "NAME", "EMAIL", "RATE", "ACTIVE"
            );
            for user in users {
                println!(
                    "{:<5} {:<7} {:<24} {:<32} {:>6.1}  {}",
                    user.id,
                    user.role.as_str(),
                    user.name,
                    user.email,
                    user.commission_rate,
                    if user.active { "yes" } else { "no" }
                );
            }
        }
        UserCommands::Deactivate { id } => {
            let user = db.deactivate_user(id)?;
            println!("Deactivated {} <{}>", user.name, user.email);
        }
    }

    Ok(())
}
