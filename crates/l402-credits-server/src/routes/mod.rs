pub mod account;
pub mod health;
pub mod payment;
pub mod ticker;
pub mod webhooks;

use actix_web::web;

/// Mount every route.
pub fn configure(cfg: &mut web::ServiceConfig) {
    health::configure(cfg);
    account::configure(cfg);
    ticker::configure(cfg);
    payment::configure(cfg);
    webhooks::configure(cfg);
}
