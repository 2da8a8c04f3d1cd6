pub mod dispatcher;
pub mod effects;

pub use dispatcher::{
    CycleReport, DispatchContext, Dispatcher, NotificationSettings, flags_from, plan_notifications,
    should_auto_open,
};
pub use effects::{CommandPort, DesktopEffects, EffectPort, ProcessCommands, SideEffect, SoundKind};
