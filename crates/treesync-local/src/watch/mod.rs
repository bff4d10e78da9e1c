mod notifier;

pub use notifier::{ChangeNotifier, NotifierEvent, RefreshOutcome};
