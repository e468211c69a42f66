pub mod url_map;
