//! View models behind the HTTP routes. Blocking work runs on actix's
//! blocking pool; screen state is only touched once that work returns.

pub mod history;
pub mod result;

pub use history::HistoryScreen;
pub use result::{ResultScreen, ResultScreens, ResultState, MAX_OPEN_RESULTS};
