use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::info;
use ulid::Ulid;

use innkeep::config::Config;
use innkeep::engine::Engine;
use innkeep::form::{AvailabilityReply, parse_month, parse_range};
use innkeep::housekeeping;
use innkeep::model::{GuestDetails, NewReservation, ReservationId, RoomId};
use innkeep::session::SessionManager;
use innkeep::store::{LedgerStore, RestrictionStore};

const USAGE: &str = "usage:
  innkeep availability START END              rooms free for [START, END] (YYYY-MM-DD)
  innkeep calendar YEAR MONTH                 admin calendar for one month
  innkeep book ROOM START END FIRST LAST EMAIL PHONE
  innkeep cancel RESERVATION";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    innkeep::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(LedgerStore::open(&config.ledger_path())?);
    if store.list_rooms().await?.is_empty() {
        for name in &config.seed_rooms {
            let room = store.create_room(name).await?;
            info!("seeded room {} {:?}", room.id, room.name);
        }
    }
    housekeeping::compact_if_needed(&store, config.compact_threshold).await?;
    tokio::spawn(housekeeping::run_compactor(
        store.clone(),
        config.compact_threshold,
        config.compact_interval,
    ));

    let sessions = Arc::new(SessionManager::new(config.session_lifetime));
    tokio::spawn(housekeeping::run_session_sweeper(sessions.clone(), Duration::from_secs(60)));

    info!("innkeep ledger: {}", config.ledger_path().display());
    info!("  store timeout: {:?}", config.store_timeout);
    info!("  session lifetime: {:?}", config.session_lifetime);

    let engine = Engine::new(store, config.engine());
    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    let report = match args.as_slice() {
        ["availability", start, end] => {
            let range = parse_range(start, end)?;
            let free = engine.search_availability_all_rooms(range).await?;
            let mut replies = Vec::new();
            for room in engine.store().list_rooms().await? {
                let available = free.iter().any(|r| r.id == room.id);
                replies.push(json!({
                    "room": room.name,
                    "reply": AvailabilityReply::new(room.id, range, available),
                }));
            }
            json!({ "range": range.to_string(), "free": free, "rooms": replies })
        }
        ["calendar", year, month] => {
            let month = parse_month(year, month)?;
            let session = sessions.get_or_create(&Ulid::new().to_string())?;
            let views = engine.build_calendar(month, &*session).await?;
            json!({
                "month": month.to_string(),
                "previous": month.previous().to_string(),
                "next": month.next().to_string(),
                "rooms": views
                    .into_iter()
                    .map(|(room, view)| json!({ "room": room, "view": view }))
                    .collect::<Vec<_>>(),
            })
        }
        ["book", room, start, end, first, last, email, phone] => {
            let reservation = engine
                .book_room(NewReservation {
                    guest: GuestDetails {
                        first_name: first.to_string(),
                        last_name: last.to_string(),
                        email: email.to_string(),
                        phone: phone.to_string(),
                    },
                    room_id: room.parse::<RoomId>()?,
                    stay: parse_range(start, end)?,
                })
                .await?;
            serde_json::to_value(reservation)?
        }
        ["cancel", id] => {
            let id: ReservationId = id.parse()?;
            engine.cancel_reservation(id).await?;
            json!({ "cancelled": id })
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
