pub mod gyro_integrator;
pub mod orientation;
