pub mod composite;
pub mod march;
pub mod ray;
pub mod volume;
