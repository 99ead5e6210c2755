pub mod actor;
pub mod activity;
pub mod config;
pub mod db;
pub mod error;
pub mod grpc;
pub mod identity;
pub mod mail;
pub mod models;
pub mod notify;
pub mod queue;
pub mod routes;
pub mod ws;

pub mod proto {
    tonic::include_proto!("mail.v1");
}

use std::sync::Arc;
use std::time::{Duration, Instant};

use rocket_cors::CorsOptions;

use crate::activity::ActivityActor;
use crate::config::Config;
use crate::db::Db;
use crate::mail::{MailActor, MailMsg, MailService};
use crate::notify::NotificationHub;
use crate::routes::Started;
use crate::ws::WsHub;

pub fn rocket() -> rocket::Rocket<rocket::Build> {
    build_rocket(Config::from_env())
}

/// Build against a specific database file with the gRPC transport off;
/// integration tests go through here.
pub fn rocket_with_db(db_path: &str) -> rocket::Rocket<rocket::Build> {
    let config = Config {
        db_path: db_path.to_string(),
        ..Config::default()
    };
    build_rocket(config)
}

pub fn rocket_with_config(config: Config) -> rocket::Rocket<rocket::Build> {
    build_rocket(config)
}

fn build_rocket(config: Config) -> rocket::Rocket<rocket::Build> {
    // Ensure the data directory exists
    if let Some(parent) = std::path::Path::new(&config.db_path).parent() {
        std::fs::create_dir_all(parent).ok();
    }

    // Startup order matters: storage first, then the hub and the actors
    // that feed it, then the API surface. Actor receive loops are bound
    // here but spawned at liftoff, once the runtime exists.
    let db = Db::new(&config.db_path);
    let hub = Arc::new(NotificationHub::new());
    let (activity_addr, activity_task) =
        actor::prepare(ActivityActor::new(db.clone(), config.activity_max_rows));
    let (mail_addr, mail_task) = actor::prepare(MailActor::new(
        db.clone(),
        Arc::clone(&hub),
        activity_addr.clone(),
        config.dedup_window_secs,
    ));
    let mail_service = MailService::new(mail_addr.clone(), db.clone(), Arc::clone(&hub));
    let (snapshot_pool, snapshot_tasks) = ws::prepare_snapshot_pool(&db);
    let ws_hub = WsHub::new();

    let cors = CorsOptions::default()
        .to_cors()
        .expect("Failed to create CORS");

    let grpc_ctx = grpc::GrpcContext {
        mail: mail_service.clone(),
        db: db.clone(),
        activity: activity_addr.clone(),
        started_at: Instant::now(),
    };
    let grpc_port = config.grpc_port;
    let sweep_interval = Duration::from_secs(config.snooze_sweep_secs);

    rocket::build()
        .manage(db)
        .manage(hub)
        .manage(mail_service)
        .manage(activity_addr)
        .manage(snapshot_pool)
        .manage(ws_hub)
        .manage(config)
        .manage(Started(Instant::now()))
        .attach(cors)
        .register("/", rocket::catchers![routes::not_found])
        .mount(
            "/",
            rocket::routes![
                routes::health,
                routes::stats,
                routes::send_message,
                routes::publish_message,
                routes::reply_to_thread,
                routes::fetch_inbox,
                routes::read_message,
                routes::read_thread,
                routes::update_message_state,
                routes::ack_message,
                routes::delete_message,
                routes::archive_thread,
                routes::delete_thread,
                routes::mark_thread_unread,
                routes::agent_status,
                routes::poll_changes,
                routes::search_messages,
                routes::create_topic,
                routes::list_topics,
                routes::subscribe_topic,
                routes::unsubscribe_topic,
                routes::register_agent,
                routes::list_agents,
                routes::get_agent,
                routes::update_agent,
                routes::delete_agent,
                routes::heartbeat,
                routes::ensure_identity,
                routes::save_identity,
                routes::list_sessions,
                routes::get_session,
                routes::start_session,
                routes::complete_session,
                routes::activity_feed,
                routes::record_activity,
                routes::push_socket,
            ],
        )
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Actor Runtime",
            {
                let tasks = std::sync::Mutex::new(Some((activity_task, mail_task, snapshot_tasks)));
                move |_rocket| {
                    let (activity_task, mail_task, snapshot_tasks) =
                        tasks.lock().unwrap().take().expect("liftoff runs once");
                    Box::pin(async move {
                        tokio::spawn(activity_task);
                        tokio::spawn(mail_task);
                        for task in snapshot_tasks {
                            tokio::spawn(task);
                        }
                        tracing::info!("actor runtime started");
                    })
                }
            },
        ))
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "Snooze Sweep",
            move |_rocket| {
                Box::pin(async move {
                    tokio::spawn(async move {
                        let mut tick = tokio::time::interval(sweep_interval);
                        loop {
                            tick.tick().await;
                            mail_addr.tell(MailMsg::Sweep);
                        }
                    });
                    tracing::info!("snooze sweep started");
                })
            },
        ))
        .attach(rocket::fairing::AdHoc::on_liftoff(
            "gRPC Server",
            move |_rocket| {
                Box::pin(async move {
                    if grpc_port == 0 {
                        return;
                    }
                    tokio::spawn(async move {
                        if let Err(e) = grpc::serve(grpc_ctx, grpc_port).await {
                            tracing::error!(error = %e, "gRPC server exited");
                        }
                    });
                })
            },
        ))
}
