pub mod notifier;
pub mod paper;
pub mod postgres;
pub mod rest_broker;

pub use notifier::{Notification, NotificationSink, Notifier, WebhookNotifier};
pub use paper::{FillMode, PaperBroker};
pub use postgres::PostgresStore;
pub use rest_broker::RestBroker;
