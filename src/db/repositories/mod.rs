pub mod camera_state;
