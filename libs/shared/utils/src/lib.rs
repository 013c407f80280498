pub mod time;

pub use time::{
    clock_label, format_for_display, naive_wall_time, new_id, parse_iso_datetime, spa_date,
    spa_date_string, to_spa_tz, SPA_TZ,
};
