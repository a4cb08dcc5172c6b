//! Server and database bootstrap commands: `lockdispatch serve`, `lockdispatch init`.

use anyhow::Result;

use lockdispatch::config::DispatchConfig;
use lockdispatch::dispatch::db::NewUser;
use lockdispatch::dispatch::models::UserRole;

pub async fn cmd_serve(config: &DispatchConfig) -> Result<()> {
    for problem in config.validate() {
        tracing::warn!(%problem, "configuration problem");
    }
    lockdispatch::dispatch::server::start_server(config).await
}

pub fn cmd_init(
    config: &DispatchConfig,
    admin_email: Option<&str>,
    admin_name: &str,
    admin_password: Option<&str>,
) -> Result<()> {
    let db = super::open_db(config)?;
    println!(
        "Database initialized at {}",
        config.database.path.display()
    );

    let Some(email) = admin_email else {
        return Ok(());
    };
    if db.get_user_by_email(email)?.is_some() {
        println!("User {} already exists; leaving it unchanged.", email);
        return Ok(());
    }
    let password = admin_password
        .ok_or_else(|| anyhow::anyhow!("--admin-password is required with --admin-email"))?;

    let admin = db.create_user(&NewUser {
        name: admin_name.to_string(),
        email: email.to_string(),
        phone: None,
        role: UserRole::Admin,
        commission_rate: None,
        password: password.to_string(),
    })?;
    tracing::info!(user_id = admin.id, "created initial admin");
    println!("Created admin {} <{}> (id {})", admin.name, admin.email, admin.id);
    Ok(())
}
