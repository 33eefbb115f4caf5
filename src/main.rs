#[macro_use] extern crate rocket;

use std::sync::Arc;

use uptimer::config::Config;
use uptimer::db::Db;
use uptimer::{catchers, routes, scheduler};

#[launch]
fn rocket() -> _ {
    dotenvy::dotenv().ok();

    let cfg = Config::from_env();
    let database = Arc::new(Db::new(&cfg.database_path).expect("Failed to initialize database"));

    let scheduler_db = database.clone();
    let scheduler_cfg = cfg.clone();

    let cors = rocket_cors::CorsOptions::default()
        .to_cors()
        .expect("Failed to build CORS fairing");

    rocket::build()
        .manage(database)
        .manage(cfg)
        .mount("/api/v1", routes![
            routes::health,
            routes::status_page,
            routes::monitor_latency,
            routes::monitor_uptime,
            routes::monitor_outages,
            routes::analytics_uptime,
            routes::list_incidents,
            routes::list_maintenance_windows,
        ])
        .register("/", catchers![
            catchers::bad_request,
            catchers::not_found,
            catchers::unprocessable_entity,
            catchers::internal_error,
            catchers::service_unavailable,
        ])
        .attach(cors)
        .attach(rocket::fairing::AdHoc::on_liftoff("Scheduler", move |rocket| {
            Box::pin(async move {
                let shutdown = rocket.shutdown();
                tokio::spawn(scheduler::run_scheduler(scheduler_db, scheduler_cfg, shutdown));
            })
        }))
}
