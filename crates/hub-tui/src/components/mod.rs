pub mod country_list;
pub mod header;
pub mod now_playing;
pub mod station_list;
