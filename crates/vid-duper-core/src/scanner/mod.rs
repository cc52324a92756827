pub mod walk;

pub use walk::enumerate_videos;
