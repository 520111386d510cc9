pub mod desired;
pub mod hooks;
pub mod keymap;
pub mod launch;
pub mod logger;
pub mod lua_rt;
pub mod orchestrator;
pub mod platform;
pub mod reconciler;
pub mod settings;
pub mod sleep;
pub mod startup;
pub mod types;
pub mod urls;
pub mod watch;
pub mod window;
