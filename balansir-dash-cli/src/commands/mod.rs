pub mod calendar;
pub mod logs;
pub mod watch;

pub use calendar::{handle_calendar_command, CalendarArgs};
pub use logs::{handle_logs_command, LogsArgs};
pub use watch::{handle_watch_command, WatchArgs};

use balansir_dash_core::{
    BalansirClient, DashConfig, Dashboard, DashboardSettings, IngestSettings, Ingestion,
};
use std::rc::Rc;

/// A fresh dashboard fed by `client`.
fn ingestion(config: &DashConfig, client: BalansirClient) -> Rc<Ingestion> {
    let dashboard = Rc::new(Dashboard::new(DashboardSettings::from(config)));
    Rc::new(Ingestion::new(
        dashboard,
        Rc::new(client),
        IngestSettings::from(config),
    ))
}
