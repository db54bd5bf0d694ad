pub mod app {
    pub mod config;
    pub mod error;
    pub mod routes;
    pub mod startup;
    pub mod state;
    pub mod tracing_init;
}

pub mod engine;

pub mod handlers {
    pub mod fallback;
    pub mod health;
    pub mod mediafusion;
    pub mod metrics;
    pub mod sessions;
    pub mod stream;
    pub mod stremio;
}

pub mod lifecycle {
    pub mod driver;
    pub mod manager;
    pub mod reaper;
    pub mod selection;
}

pub mod metrics {
    pub mod collector;
}

pub mod models {
    pub mod api;
    pub mod session;
    pub mod torrent;
}

pub mod stores {
    pub mod session_registry;
    pub mod torrent_session;
}

pub mod streaming {
    pub mod body;
    pub mod content_type;
    pub mod controller;
    pub mod range;
}

pub mod utils {
    pub mod auth;
    pub mod time;
}

pub mod validation {
    pub mod identifier;
}
