use anyhow::{anyhow, bail, Context};
use serde_json::Value;

use sleepdex::auth::SessionState;
use sleepdex::cache::Loaded;
use sleepdex::catalog::services::load_catalog;
use sleepdex::catalog::CatalogKind;
use sleepdex::config::AppConfig;
use sleepdex::creatures::services::load_creatures;
use sleepdex::news::services::load_news;
use sleepdex::search::SearchView;
use sleepdex::skills::effects::interpret;
use sleepdex::skills::services::load_main_skill;
use sleepdex::AppState;

const USAGE: &str = "usage: sleepdex <catalog <kind> [query] | search <query> [pages] | news | effects <main-skill-id> | login [email] <password> | logout [--forget] | whoami>";

fn report<T>(what: &str, loaded: &Loaded<T>) {
    match loaded {
        Loaded::Ready { source, .. } if source.is_cached() => {
            eprintln!("{} served from {:?} cache", what, source);
        }
        Loaded::Ready { .. } => {}
        Loaded::Fallback {
            reason, auth_expired, ..
        } => {
            eprintln!("{} unavailable: {}", what, reason);
            if *auth_expired {
                eprintln!("session expired; run `sleepdex login`");
            }
        }
    }
}

fn cell(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "sleepdex=debug".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        bail!(USAGE);
    };

    let st = AppState::init(AppConfig::from_env())?;
    let _expiry = st.session.spawn_expiry_listener();
    st.session.bootstrap().await;

    match command.as_str() {
        "catalog" => {
            let kind = args
                .get(1)
                .and_then(|k| CatalogKind::parse(k))
                .ok_or_else(|| anyhow!("kind must be one of berries, ingredients, main_skills, sub_skills"))?;
            let query = args.get(2).map(|q| q.to_lowercase());
            let loaded = load_catalog(&st, kind).await;
            report(kind.as_str(), &loaded);
            for entry in loaded.items() {
                let name = entry.display_name();
                if query.as_ref().is_some_and(|q| !name.to_lowercase().contains(q.as_str())) {
                    continue;
                }
                println!("{:>4}  {}", entry.id, name);
            }
        }
        "search" => {
            let query = args.get(1).cloned().unwrap_or_default();
            let pages: usize = match args.get(2) {
                Some(p) => p.parse().context("pages must be a number")?,
                None => 1,
            };
            let loaded = load_creatures(&st).await;
            report("creatures", &loaded);
            let mut view = SearchView::new(loaded.items().to_vec());
            view.set_query(&query);
            for _ in 1..pages {
                view.observe_sentinel(false);
                if !view.observe_sentinel(true) {
                    break;
                }
            }
            for card in view.visible() {
                println!(
                    "#{}  {}  [{}]",
                    card.padded_dex(),
                    card.name,
                    card.type_name.as_deref().unwrap_or("-")
                );
            }
            println!(
                "{} of {} matches{}",
                view.visible().len(),
                view.total_matches(),
                if view.has_more() { ", more available" } else { "" }
            );
        }
        "news" => {
            let load = load_news(&st).await;
            report("news", &load.loaded);
            for item in load.loaded.items() {
                println!(
                    "{:>5}  {:<16}  {}  {}",
                    item.id,
                    item.category,
                    item.published_label.as_deref().unwrap_or("-"),
                    item.title
                );
            }
            if let Some(handle) = load.revalidation {
                handle.await.ok();
            }
        }
        "effects" => {
            let id: u32 = args
                .get(1)
                .ok_or_else(|| anyhow!(USAGE))?
                .parse()
                .context("main skill id must be a positive integer")?;
            let skill = load_main_skill(&st, id)
                .await?
                .ok_or_else(|| anyhow!("main skill {} not found", id))?;
            println!("{} (#{})", skill.localized_name.as_deref().unwrap_or(&skill.name), skill.id);
            for level in &skill.levels {
                let value = level.value.as_ref().map(|v| v.to_string()).unwrap_or_default();
                println!("Lv.{}  {}", level.level, value);
                for table in interpret(&level.extra_effects) {
                    if let Some(title) = &table.title {
                        println!("  [{}]", title);
                    }
                    println!("  {}", table.columns.join(" | "));
                    for row in &table.rows {
                        let cells: Vec<String> = row.iter().map(cell).collect();
                        println!("  {}", cells.join(" | "));
                    }
                }
            }
        }
        "login" => {
            // `login <password>` reuses the remembered email
            let (email, password) = match (args.get(1), args.get(2)) {
                (Some(email), Some(password)) => (email.clone(), password),
                (Some(password), None) => (
                    st.session
                        .remembered_email()
                        .ok_or_else(|| anyhow!("no remembered email\n{}", USAGE))?,
                    password,
                ),
                _ => bail!(USAGE),
            };
            let session = st.session.login(&email, password).await?;
            println!("signed in as {}", session.user.email.as_deref().unwrap_or(&email));
        }
        "logout" => {
            st.session.logout().await;
            if args.get(1).is_some_and(|a| a == "--forget") {
                st.session.forget_email();
            }
            println!("signed out");
        }
        "whoami" => {
            let state = st.session.state();
            let role = if state.is_admin() { "admin" } else { "user" };
            match state {
                SessionState::Authenticated { session, profile } => {
                    let name = profile
                        .and_then(|p| p.display_name)
                        .unwrap_or_else(|| session.user.id.to_string());
                    println!("{} ({})", name, role);
                }
                _ => println!("anonymous"),
            }
        }
        other => bail!("unknown command `{}`\n{}", other, USAGE),
    }

    Ok(())
}
