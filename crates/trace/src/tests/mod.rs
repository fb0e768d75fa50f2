mod registry;
mod render;
