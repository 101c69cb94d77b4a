//! Terminal-based chunk map explorer using ratatui
//!
//! Each map tile is drawn as one two-column terminal cell. Pan with the arrow
//! keys, type a seed, cycle world type and version. Tiles fill in as the
//! server answers.

use std::collections::HashMap;
use std::error::Error;
use std::io::stdout;
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEvent},
    execute,
    terminal::{self, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    prelude::*,
    style::{Color, Style},
    widgets::{Block, Borders, Clear, Paragraph},
};
use tokio::runtime::Handle;

use crate::cache::TileState;
use crate::config::ViewerConfig;
use crate::reconciler::GridReconciler;
use crate::seed::{SeedInput, SeedSource};
use crate::sink::{TileSink, UiHandle};
use crate::transport::{HttpTransport, TileImage};
use crate::viewport::{ContainerGeometry, Coord, PanCenter, Rect as PixelRect};

pub const WORLD_TYPES: [&str; 4] = ["default", "large_biome", "flat", "default_1_1"];
pub const VERSIONS: [&str; 6] = ["1.16", "1.15", "1.14", "1.13", "1.12", "1.7"];

/// How a tile element looks on screen
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Look {
    Placeholder,
    Empty,
    /// Image we cannot show in a terminal
    Remote,
    /// Mean colour of an inline image or of the tile's biomes
    Swatch(u8, u8, u8),
}

#[derive(Clone, Debug)]
pub struct TileCell {
    pub coord: Coord,
    pub offset: (f64, f64),
    pub look: Look,
}

/// Sink keeping one cell per tile element
#[derive(Default)]
pub struct TerminalSink {
    next_handle: u64,
    cells: HashMap<UiHandle, TileCell>,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cell(&self, handle: UiHandle) -> Option<&TileCell> {
        self.cells.get(&handle)
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }
}

impl TileSink for TerminalSink {
    fn create(&mut self, coord: Coord, bounds: PixelRect) -> UiHandle {
        let handle = UiHandle(self.next_handle);
        self.next_handle += 1;
        self.cells.insert(
            handle,
            TileCell {
                coord,
                offset: (bounds.left, bounds.top),
                look: Look::Placeholder,
            },
        );
        handle
    }

    fn set_offset(&mut self, handle: UiHandle, left: f64, top: f64) {
        if let Some(cell) = self.cells.get_mut(&handle) {
            cell.offset = (left, top);
        }
    }

    fn show_image(&mut self, handle: UiHandle, image: &TileImage) {
        if let Some(cell) = self.cells.get_mut(&handle) {
            cell.look = image_look(image);
        }
    }

    fn show_biomes(&mut self, handle: UiHandle, values: &[i64]) {
        let Some(look) = biome_look(values) else {
            return;
        };
        if let Some(cell) = self.cells.get_mut(&handle) {
            cell.look = look;
        }
    }

    fn clear(&mut self, handle: UiHandle) {
        if let Some(cell) = self.cells.get_mut(&handle) {
            cell.look = Look::Empty;
        }
    }

    fn remove(&mut self, handle: UiHandle) {
        self.cells.remove(&handle);
    }
}

/// Map colour of a biome id
pub fn biome_color(id: i64) -> Option<(u8, u8, u8)> {
    let rgb = match id {
        0 => (0, 0, 112),      // ocean
        1 => (141, 179, 96),   // plains
        2 => (250, 148, 24),   // desert
        3 => (96, 96, 96),     // extreme hills
        4 => (5, 102, 33),     // forest
        5 => (11, 102, 89),    // taiga
        6 => (7, 249, 178),    // swamp
        7 => (0, 0, 255),      // river
        8 => (255, 0, 0),      // hell
        9 => (128, 128, 255),  // sky
        10 => (144, 144, 160), // frozen ocean
        11 => (160, 160, 255), // frozen river
        12 => (255, 255, 255), // ice plains
        13 => (160, 160, 160), // ice mountains
        14 => (255, 0, 255),   // mushroom island
        15 => (160, 0, 255),   // mushroom shore
        16 => (250, 222, 85),  // beach
        17 => (210, 95, 18),   // desert hills
        18 => (34, 85, 28),    // forest hills
        19 => (22, 57, 51),    // taiga hills
        20 => (114, 120, 154), // extreme hills edge
        21 => (83, 123, 9),    // jungle
        22 => (44, 66, 5),     // jungle hills
        _ => return None,
    };
    Some(rgb)
}

/// Mean colour of the known biomes in a tile
pub fn biome_look(values: &[i64]) -> Option<Look> {
    let (r, g, b, n) = values
        .iter()
        .filter_map(|&id| biome_color(id))
        .fold((0u64, 0u64, 0u64, 0u64), |(r, g, b, n), (cr, cg, cb)| {
            (r + cr as u64, g + cg as u64, b + cb as u64, n + 1)
        });
    if n == 0 {
        return None;
    }
    Some(Look::Swatch((r / n) as u8, (g / n) as u8, (b / n) as u8))
}

/// Decode inline images to their mean colour
pub fn image_look(image: &TileImage) -> Look {
    let TileImage::Data { bytes, .. } = image else {
        return Look::Remote;
    };

    match image::load_from_memory(bytes) {
        Ok(img) => {
            let rgb = img.to_rgb8();
            let count = (rgb.width() as u64 * rgb.height() as u64).max(1);
            let (r, g, b) = rgb.pixels().fold((0u64, 0u64, 0u64), |(r, g, b), p| {
                (r + p[0] as u64, g + p[1] as u64, b + p[2] as u64)
            });
            Look::Swatch((r / count) as u8, (g / count) as u8, (b / count) as u8)
        }
        Err(e) => {
            log::debug!("Inline tile image not decodable: {}", e);
            Look::Remote
        }
    }
}

/// Explorer state
struct Explorer {
    grid: GridReconciler<HttpTransport, TerminalSink>,
    seeds: SeedInput,
    seed_text: String,
    editing_seed: bool,
    world_type: usize,
    version: usize,
    pan: PanCenter,
    show_help: bool,
    message: Option<String>,
}

impl Explorer {
    fn new(config: ViewerConfig, seeds: SeedInput, runtime: Handle) -> Result<Self, Box<dyn Error>> {
        let transport = HttpTransport::new(&config.base_url)?;
        let grid = GridReconciler::new(config, transport, TerminalSink::new(), runtime);

        Ok(Explorer {
            grid,
            seeds,
            seed_text: String::new(),
            editing_seed: false,
            world_type: 0,
            version: 0,
            pan: PanCenter::default(),
            show_help: false,
            message: None,
        })
    }

    /// Pan by whole tiles
    fn pan_by(&mut self, dx: i64, dz: i64) {
        let size = self.grid.config().tile_size as f64;
        self.pan.x += dx as f64 * size;
        self.pan.z += dz as f64 * size;
    }

    fn next_world_type(&mut self) {
        self.world_type = (self.world_type + 1) % WORLD_TYPES.len();
        self.grid.set_world_type(Some(WORLD_TYPES[self.world_type]));
        self.message = Some(format!("World type: {}", WORLD_TYPES[self.world_type]));
    }

    fn next_version(&mut self) {
        self.version = (self.version + 1) % VERSIONS.len();
        self.grid.set_version(Some(VERSIONS[self.version]));
        self.message = Some(format!("Version: {}", VERSIONS[self.version]));
    }

    fn edit_seed(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Enter | KeyCode::Esc => self.editing_seed = false,
            KeyCode::Backspace => {
                self.seed_text.pop();
                self.seeds.input(&self.seed_text);
            }
            KeyCode::Char(c) => {
                self.seed_text.push(c);
                self.seeds.input(&self.seed_text);
            }
            _ => {}
        }
    }

    /// Apply whatever arrived from the network since the last frame
    fn poll_updates(&mut self) {
        while let Some(update) = self.seeds.try_next() {
            match update.result {
                Ok(seed) => {
                    self.grid.set_seed(Some(seed));
                    self.message = Some(format!("Seed: {}", seed));
                }
                Err(e) => self.message = Some(format!("Seed failed: {}", e)),
            }
        }
        self.grid.drain_completions();
    }

    /// Container geometry for a map area of the given terminal size
    fn geometry(&self, area: Rect) -> ContainerGeometry {
        let tile_px = self.grid.config().tile_px();
        ContainerGeometry::new(
            (area.width / 2) as f64 * tile_px,
            area.height as f64 * tile_px,
            self.pan,
        )
    }

    fn render_map(&self, area: Rect, buf: &mut Buffer) {
        let tile_px = self.grid.config().tile_px();
        let scale = self.grid.config().scale;
        let sink = self.grid.sink();

        for record in self.grid.cache().iter() {
            let Some(cell) = sink.cell(record.ui) else {
                continue;
            };

            // The whole container is shifted by the pan
            let px = cell.offset.0 - self.pan.x * scale;
            let py = cell.offset.1 - self.pan.z * scale;
            let col = (px / tile_px).floor() as i64 * 2;
            let row = (py / tile_px).floor() as i64;
            if col < 0 || row < 0 || col + 1 >= area.width as i64 || row >= area.height as i64 {
                continue;
            }

            let (text, style) = tile_display(record.state(), cell.look);
            buf.set_string(area.x + col as u16, area.y + row as u16, text, style);
        }
    }

    fn render_help(&self, area: Rect, buf: &mut Buffer) {
        let lines = [
            "Arrows/hjkl  pan one tile",
            "S            edit seed (Enter to finish)",
            "T            next world type",
            "V            next version",
            "X            stop all requests",
            "C            back to origin",
            "?            this help",
            "Q/Esc        quit",
        ];
        let width = 46.min(area.width);
        let height = (lines.len() as u16 + 2).min(area.height);
        let popup = Rect::new(
            area.x + (area.width - width) / 2,
            area.y + (area.height - height) / 2,
            width,
            height,
        );
        Clear.render(popup, buf);
        Paragraph::new(lines.join("\n"))
            .block(Block::default().borders(Borders::ALL).title(" Help "))
            .render(popup, buf);
    }

    fn status_line(&self) -> String {
        let identity = self.grid.identity();
        let stats = self.grid.queue_stats();
        let seed = if self.editing_seed {
            format!("Seed: {}_", self.seed_text)
        } else {
            format!(
                "Seed: {}",
                identity.seed.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string())
            )
        };
        let msg = self.message.as_ref().map(|m| format!(" | {}", m)).unwrap_or_default();

        format!(
            " {} | {} | {} | ({:.0},{:.0}) | tiles:{} queued:{} active:{}{} | ?:Help Q:Quit",
            seed,
            WORLD_TYPES[self.world_type],
            VERSIONS[self.version],
            self.pan.x,
            self.pan.z,
            self.grid.cache().len(),
            stats.queued,
            stats.in_flight,
            msg,
        )
    }
}

fn tile_display(state: TileState, look: Look) -> (&'static str, Style) {
    match (state, look) {
        (_, Look::Swatch(r, g, b)) => ("  ", Style::default().bg(Color::Rgb(r, g, b))),
        (_, Look::Remote) => ("##", Style::default().fg(Color::Green)),
        (TileState::Pending, _) => ("X ", Style::default().fg(Color::DarkGray)),
        (TileState::Failed, _) => ("!!", Style::default().fg(Color::Red)),
        (TileState::Idle, _) => ("..", Style::default().fg(Color::DarkGray)),
        _ => ("  ", Style::default().bg(Color::Black)),
    }
}

/// Run the explorer
pub fn run_explorer(
    config: ViewerConfig,
    seed_text: Option<String>,
    local_seed: bool,
    runtime: Handle,
) -> Result<(), Box<dyn Error>> {
    let source = if local_seed {
        SeedSource::Local
    } else {
        SeedSource::Remote(crate::seed::SeedClient::new(&config.base_url)?)
    };
    let seeds = SeedInput::new(source, config.seed_debounce, runtime.clone());
    let mut explorer = Explorer::new(config, seeds, runtime)?;

    explorer.grid.set_world_type(Some(WORLD_TYPES[0]));
    explorer.grid.set_version(Some(VERSIONS[0]));
    if let Some(text) = seed_text {
        explorer.seed_text = text;
        explorer.seeds.input(&explorer.seed_text);
    }

    // Setup terminal
    terminal::enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    loop {
        explorer.poll_updates();

        let size = terminal.size()?;
        let map_area = Rect::new(0, 0, size.width, size.height.saturating_sub(1));
        let geometry = explorer.geometry(map_area);
        if explorer.grid.geometry() != Some(geometry) {
            explorer.grid.on_viewport_or_identity_change(geometry);
        }

        terminal.draw(|f| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Min(1), Constraint::Length(1)])
                .split(f.area());

            explorer.render_map(chunks[0], f.buffer_mut());

            let status = Paragraph::new(explorer.status_line())
                .style(Style::default().bg(Color::DarkGray).fg(Color::White));
            f.render_widget(status, chunks[1]);

            if explorer.show_help {
                explorer.render_help(chunks[0], f.buffer_mut());
            }
        })?;

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if explorer.show_help {
                    explorer.show_help = false;
                    continue;
                }
                if explorer.editing_seed {
                    explorer.edit_seed(key);
                    continue;
                }

                explorer.message = None;
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => break,
                    KeyCode::Char('?') => explorer.show_help = true,

                    KeyCode::Up | KeyCode::Char('k') => explorer.pan_by(0, -1),
                    KeyCode::Down | KeyCode::Char('j') => explorer.pan_by(0, 1),
                    KeyCode::Left | KeyCode::Char('h') => explorer.pan_by(-1, 0),
                    KeyCode::Right | KeyCode::Char('l') => explorer.pan_by(1, 0),
                    KeyCode::PageUp => explorer.pan_by(0, -10),
                    KeyCode::PageDown => explorer.pan_by(0, 10),

                    KeyCode::Char('s') | KeyCode::Char('S') => explorer.editing_seed = true,
                    KeyCode::Char('t') | KeyCode::Char('T') => explorer.next_world_type(),
                    KeyCode::Char('v') | KeyCode::Char('V') => explorer.next_version(),
                    KeyCode::Char('x') | KeyCode::Char('X') => {
                        let stopped = explorer.grid.stop_all();
                        explorer.message = Some(format!("Stopped {} requests", stopped));
                    }
                    KeyCode::Char('c') | KeyCode::Char('C') => explorer.pan = PanCenter::default(),
                    _ => {}
                }
            }
        }
    }

    // Cleanup
    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    Ok(())
}
