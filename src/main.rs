// Entry point and window glue
//
// The window and event loop are deliberately thin: open a window, run the
// renderer bootstrap against its surface, load demo content through the
// staged uploader, and tear everything down on close. Rendering frames is
// the next layer up and not wired in yet.

mod backend;
mod config;
mod renderer;
mod scene;

use anyhow::{Context, Result};
use config::Config;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use renderer::{Renderer, RendererOptions, ShaderBlobs};
use scene::{MeshData, SceneNode, Vertex};
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

fn main() -> Result<()> {
    let config = Config::load();

    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
    log::info!("Starting {}", config.window.title);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    app.result
}

struct App {
    config: Config,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer>,
    result: Result<()>,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            window: None,
            renderer: None,
            result: Ok(()),
        }
    }

    fn init_renderer(&mut self, window: &Window) -> Result<()> {
        let shaders = ShaderBlobs {
            vertex: std::fs::read(&self.config.shaders.vertex).with_context(|| {
                format!("Failed to read vertex shader {:?}", self.config.shaders.vertex)
            })?,
            fragment: std::fs::read(&self.config.shaders.fragment).with_context(|| {
                format!(
                    "Failed to read fragment shader {:?}",
                    self.config.shaders.fragment
                )
            })?,
        };

        let options = RendererOptions {
            app_name: self.config.window.title.clone(),
            enable_validation: cfg!(debug_assertions) && self.config.debug.validation_layers,
        };

        let size = window.inner_size();
        let mut renderer = Renderer::new(
            window.display_handle()?.as_raw(),
            window.window_handle()?.as_raw(),
            (size.width, size.height),
            &shaders,
            &options,
        )?;

        renderer
            .load_model(&demo_scene())
            .context("Failed to upload demo scene")?;

        self.renderer = Some(renderer);
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.result = Err(e).context("Failed to create window");
                event_loop.exit();
                return;
            }
        };

        if let Err(e) = self.init_renderer(&window) {
            log::error!("Renderer bootstrap failed: {:#}", e);
            self.result = Err(e);
            event_loop.exit();
            return;
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down");
                if let Some(renderer) = self.renderer.take() {
                    renderer.cleanup();
                }
                event_loop.exit();
            }
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    if let Some(renderer) = self.renderer.take() {
                        renderer.cleanup();
                    }
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }
}

/// A two-node scene (a parent quad plus one child quad) that exercises
/// the full flatten-and-upload path.
fn demo_scene() -> SceneNode {
    let quad = |offset: f32, material_index: usize| MeshData {
        vertices: vec![
            Vertex::new([-0.5 + offset, -0.5, 0.0], [0.0, 0.0]),
            Vertex::new([0.5 + offset, -0.5, 0.0], [1.0, 0.0]),
            Vertex::new([0.5 + offset, 0.5, 0.0], [1.0, 1.0]),
            Vertex::new([-0.5 + offset, 0.5, 0.0], [0.0, 1.0]),
        ],
        indices: vec![0, 1, 2, 2, 3, 0],
        material_index,
    };

    SceneNode {
        meshes: vec![quad(0.0, 0)],
        children: vec![SceneNode {
            meshes: vec![quad(0.25, 1)],
            children: Vec::new(),
        }],
    }
}
