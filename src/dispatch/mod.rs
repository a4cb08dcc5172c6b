//! Locksmith dispatch back office.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │  Client  │ ───────> │  server.rs  (axum Router, TraceLayer, shutdown)  │
//! │ (poller) │ <─────── │    └─ api/  (handlers per resource, AppState)    │
//! └──────────┘ WebSocket│         │                                        │
//!                       │         │ DbHandle::call()                       │
//!                       │         v                                        │
//!                       │  db/  (DispatchDb, sync version, sessions)       │
//!                       │         │                                        │
//!                       │         │ plan_transition() / calculate_...()    │
//!                       │         v                                        │
//!                       │  lifecycle.rs    finance.rs                      │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Supporting Modules
//!
//! | Module      | Responsibility                                            |
//! |-------------|-----------------------------------------------------------|
//! | `models`    | Shared types: `User`, `Job`, `JobStatus`, stats rows      |
//! | `auth`      | Password hashing, session tokens, bearer parsing          |
//! | `ws`        | `WsMessage` events, per-user filtered socket feed         |
//! | `sync`      | `Poller` over a `SyncSource`, change callbacks            |
//!
//! ## Typical Request Flow (worker completes a job)
//!
//! 1. `POST /api/jobs/{id}/complete` → `api::jobs::complete_job()`
//! 2. `DispatchDb::apply_transition()` opens a transaction, loads the job
//!    and asks `lifecycle::plan_transition()` whether the worker may move
//!    it from `in_progress` to `completed`.
//! 3. The job row gets the payment details and a commission snapshot from
//!    the worker's current rate; a `job_updates` row and notifications for
//!    admins and the owning client are written; the sync version is bumped.
//! 4. The handler broadcasts `JobStatusChanged` and `NotificationCreated`
//!    over the WebSocket. Polling clients see the new version on their
//!    next `GET /api/sync/status`.

pub mod api;
pub mod auth;
pub mod db;
pub mod finance;
pub mod lifecycle;
pub mod models;
pub mod server;
pub mod sync;
pub mod ws;
