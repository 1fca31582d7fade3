pub mod builder;
pub mod checks;
pub mod model;
pub mod promotion;
pub mod residual;
pub mod route_pass;
