pub mod canvas;
pub mod session_pick;
