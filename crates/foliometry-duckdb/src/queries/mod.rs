pub mod top_cities;
