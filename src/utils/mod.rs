// Gateway module for utils - follows the Train Station Pattern
// All external access must go through this gateway

// Private submodules - not directly accessible from outside
mod clock;
mod dice;
mod errors;
mod logger;

// Public re-exports - the ONLY way to access utils functionality
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use dice::{Dice, SharedDice};
pub use errors::{CacheError, CacheResult};
pub use logger::{init_logger, log_debug, log_info, log_warn};
