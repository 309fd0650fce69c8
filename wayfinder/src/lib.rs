pub mod handlers;

// Re-export commonly used handler functions for convenience
pub use handlers::{
    ExploreOverrides, apply_overrides, build_decider, describe_event, load_config,
    load_urls_from_file, load_urls_from_source, parse_mode, parse_url_line, render_json,
    render_summary,
};
