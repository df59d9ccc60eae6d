mod app_router;
pub mod calendar;
pub mod gmail;

pub use app_router::AppRouter;
