pub mod email;

pub use email::{ReminderMailer, SystemEmailService};
