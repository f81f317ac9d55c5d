use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use eframe::egui;
use sg_core::{EngineConfig, HashAlgorithm, MetadataOutcome, SearchKind, SearchQuery};
use sg_ui::{AppState, HexPanel, LoadingSnapshot, TaskState};

/// How often the UI polls while a job is running without progress.
const JOB_POLL_INTERVAL: Duration = Duration::from_millis(100);

struct Args {
    file: Option<PathBuf>,
    config: Option<PathBuf>,
}

fn parse_args() -> Args {
    let mut args = Args { file: None, config: None };
    let mut iter = std::env::args_os().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            args.config = iter.next().map(PathBuf::from);
        } else {
            args.file = Some(PathBuf::from(arg));
        }
    }
    args
}

fn load_config(path: Option<&Path>) -> EngineConfig {
    let Some(path) = path else {
        return EngineConfig::default();
    };
    match EngineConfig::load(path) {
        Ok(config) => {
            log::info!("Loaded config from {}", path.display());
            config
        }
        Err(e) => {
            log::error!("{:#}; using defaults", e);
            EngineConfig::default()
        }
    }
}

fn main() -> eframe::Result<()> {
    env_logger::init();

    let args = parse_args();
    let config = load_config(args.config.as_deref());

    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("Spyglass")
            .with_inner_size([1100.0, 760.0])
            .with_drag_and_drop(true),
        ..Default::default()
    };

    eframe::run_native(
        "Spyglass",
        options,
        Box::new(move |cc| {
            let state = AppState::with_builtin_workers(config, Arc::new(cc.egui_ctx.clone()))?;
            let mut app = SpyglassApp::new(state);
            if let Some(path) = args.file {
                app.open_file(&path);
            }
            Ok(Box::new(app))
        }),
    )
}

struct SpyglassApp {
    state: AppState,
    search_text: String,
    search_kind: SearchKind,
    ignore_case: bool,
    goto_text: String,
    hash_algorithm: HashAlgorithm,
    /// Last user-facing error, cleared by the next successful action.
    status_error: Option<String>,
    notices: Vec<String>,
    loading: Option<LoadingSnapshot>,
}

impl SpyglassApp {
    fn new(state: AppState) -> Self {
        Self {
            state,
            search_text: String::new(),
            search_kind: SearchKind::Hex,
            ignore_case: false,
            goto_text: String::new(),
            hash_algorithm: HashAlgorithm::Sha256,
            status_error: None,
            notices: Vec::new(),
            loading: None,
        }
    }

    fn report<T, E: std::fmt::Display>(&mut self, result: Result<T, E>) -> Option<T> {
        match result {
            Ok(value) => {
                self.status_error = None;
                Some(value)
            }
            Err(e) => {
                log::warn!("{}", e);
                self.status_error = Some(e.to_string());
                None
            }
        }
    }

    fn open_file(&mut self, path: &Path) {
        let result = self.state.open_file(path).map_err(|e| format!("{:#}", e));
        self.report(result);
    }

    fn pick_and_open(&mut self) {
        if let Some(path) = rfd::FileDialog::new().pick_file() {
            self.open_file(&path);
        }
    }

    fn run_search(&mut self) {
        let query = match self.search_kind {
            SearchKind::Hex => SearchQuery::hex(&self.search_text),
            SearchKind::Ascii => SearchQuery::ascii(&self.search_text, self.ignore_case),
        };
        let result = self.state.search(query);
        self.report(result);
    }

    fn run_goto(&mut self) {
        let text = self.goto_text.clone();
        let result = self.state.jump_to_offset(&text).map_err(|e| format!("{:#}", e));
        self.report(result);
    }

    fn any_job_running(&self) -> bool {
        self.state.tabs().iter().any(|tab| {
            tab.hash.is_running()
                || tab.metadata.is_running()
                || tab.search.as_ref().is_some_and(|s| s.task.is_running())
        })
    }

    fn show_menu(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("menu_bar").show(ctx, |ui| {
            egui::menu::bar(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Open...  (Ctrl+O)").clicked() {
                        ui.close_menu();
                        self.pick_and_open();
                    }
                    let active = self.state.active_id();
                    if ui.add_enabled(active.is_some(), egui::Button::new("Close tab  (Ctrl+W)")).clicked() {
                        ui.close_menu();
                        if let Some(id) = active {
                            self.state.close_tab(id);
                        }
                    }
                    ui.separator();
                    if ui.button("Quit").clicked() {
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                });
            });
        });
    }

    fn show_tabs(&mut self, ctx: &egui::Context) {
        let mut activate = None;
        let mut close = None;
        egui::TopBottomPanel::top("tabs").show(ctx, |ui| {
            ui.horizontal_wrapped(|ui| {
                for tab in self.state.tabs() {
                    let selected = self.state.active_id() == Some(tab.id);
                    if ui.selectable_label(selected, tab.name()).clicked() {
                        activate = Some(tab.id);
                    }
                    if ui.small_button("×").on_hover_text("Close").clicked() {
                        close = Some(tab.id);
                    }
                    ui.separator();
                }
            });
        });
        if let Some(id) = activate {
            self.state.activate(id);
        }
        if let Some(id) = close {
            self.state.close_tab(id);
        }
    }

    fn show_toolbar(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::top("toolbar").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label("Find");
                egui::ComboBox::from_id_salt("search_kind")
                    .selected_text(match self.search_kind {
                        SearchKind::Hex => "Hex",
                        SearchKind::Ascii => "ASCII",
                    })
                    .show_ui(ui, |ui| {
                        ui.selectable_value(&mut self.search_kind, SearchKind::Hex, "Hex");
                        ui.selectable_value(&mut self.search_kind, SearchKind::Ascii, "ASCII");
                    });
                let field = ui.add(egui::TextEdit::singleline(&mut self.search_text).desired_width(180.0));
                if self.search_kind == SearchKind::Ascii {
                    ui.checkbox(&mut self.ignore_case, "Ignore case");
                }
                let submitted = field.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                if ui.button("Search").clicked() || submitted {
                    self.run_search();
                }
                if ui.button("◀").on_hover_text("Previous match (Shift+F3)").clicked() {
                    self.state.previous_match();
                }
                if ui.button("▶").on_hover_text("Next match (F3)").clicked() {
                    self.state.next_match();
                }
                self.search_summary(ui);

                ui.separator();
                ui.label("Go to");
                let field = ui.add(egui::TextEdit::singleline(&mut self.goto_text).desired_width(110.0).hint_text("0x1000"));
                if field.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                    self.run_goto();
                }

                ui.separator();
                egui::ComboBox::from_id_salt("hash_algorithm")
                    .selected_text(self.hash_algorithm.name())
                    .show_ui(ui, |ui| {
                        for algo in HashAlgorithm::ALL {
                            ui.selectable_value(&mut self.hash_algorithm, algo, algo.name());
                        }
                    });
                if ui.button("Hash").clicked() {
                    let result = self.state.hash(self.hash_algorithm.name());
                    self.report(result);
                }
                if ui.button("Metadata").clicked() {
                    let result = self.state.metadata();
                    self.report(result);
                }
            });
        });
    }

    fn search_summary(&self, ui: &mut egui::Ui) {
        let Some(search) = self.state.active_tab().and_then(|tab| tab.search.as_ref()) else {
            return;
        };
        match search.task.state() {
            TaskState::Running { progress } => {
                let pct = progress.as_ref().map_or(0.0, |p| p.progress);
                ui.add(egui::ProgressBar::new(pct / 100.0).desired_width(90.0).show_percentage());
            }
            TaskState::Done(hits) => {
                let position = search.current.map_or(String::new(), |i| format!("{}/", i + 1));
                let source = if search.from_cache { " (cached)" } else { "" };
                ui.label(format!("{}{} matches{}", position, hits.indices.len(), source));
            }
            TaskState::Failed(message) => {
                ui.colored_label(egui::Color32::LIGHT_RED, message);
            }
            TaskState::Cancelled => {
                ui.weak("cancelled");
            }
            TaskState::Idle => {}
        }
    }

    fn show_status(&mut self, ctx: &egui::Context) {
        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            if let Some(error) = &self.status_error {
                ui.colored_label(egui::Color32::LIGHT_RED, error);
            }
            let Some(tab) = self.state.active_tab() else {
                ui.label("No file");
                return;
            };
            ui.horizontal(|ui| {
                ui.label(format!("{}  {} bytes", tab.name(), tab.file_size()));
                if let Some(loading) = self.loading.filter(LoadingSnapshot::is_loading) {
                    ui.spinner();
                    ui.label(format!("{} chunks loaded, {} in flight", loading.loaded_chunks, loading.in_flight));
                }
                if let Some((lo, hi)) = tab.selection.range() {
                    ui.separator();
                    ui.label(format!("Selection 0x{:X}..=0x{:X} ({} bytes)", lo, hi, hi - lo + 1));
                }
            });

            match tab.hash.state() {
                TaskState::Running { progress } => {
                    let pct = progress.as_ref().map_or(0.0, |p| p.progress);
                    let eta = progress.as_ref().map_or(String::new(), |p| format!(", ~{:.0}s left", p.eta_seconds));
                    ui.label(format!("Hashing... {:.0}%{}", pct, eta));
                }
                TaskState::Done(digest) => {
                    ui.horizontal(|ui| {
                        ui.label(format!("{}:", digest.hash_type));
                        ui.monospace(&digest.hash);
                        ui.weak(format!(
                            "{:.1} ms, {:.1} MiB/s",
                            digest.stats.duration_ms, digest.stats.throughput_mib_s
                        ));
                    });
                }
                TaskState::Failed(message) => {
                    ui.colored_label(egui::Color32::LIGHT_RED, format!("Hash failed: {}", message));
                }
                TaskState::Idle | TaskState::Cancelled => {}
            }

            match tab.metadata.state() {
                TaskState::Done(MetadataOutcome::Record(record)) => {
                    ui.collapsing(format!("{} metadata", record.format), |ui| {
                        egui::Grid::new("metadata_fields").striped(true).show(ui, |ui| {
                            for field in &record.fields {
                                ui.label(&field.name);
                                ui.monospace(&field.value);
                                ui.end_row();
                            }
                        });
                    });
                }
                TaskState::Done(MetadataOutcome::NoStructuredData) => {
                    ui.weak("No structured metadata");
                }
                TaskState::Failed(message) => {
                    ui.colored_label(egui::Color32::LIGHT_RED, format!("Metadata: {}", message));
                }
                _ => {}
            }
        });
    }

    fn show_notices(&mut self, ctx: &egui::Context) {
        if self.notices.is_empty() {
            return;
        }
        let mut open = true;
        egui::Window::new("Notifications")
            .open(&mut open)
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::RIGHT_BOTTOM, [-12.0, -40.0])
            .show(ctx, |ui| {
                for notice in &self.notices {
                    ui.label(notice);
                }
            });
        if !open {
            self.notices.clear();
        }
    }

    fn handle_shortcuts(&mut self, ctx: &egui::Context) {
        let (open, close, next, previous) = ctx.input(|i| {
            (
                i.modifiers.ctrl && i.key_pressed(egui::Key::O),
                i.modifiers.ctrl && i.key_pressed(egui::Key::W),
                !i.modifiers.shift && i.key_pressed(egui::Key::F3),
                i.modifiers.shift && i.key_pressed(egui::Key::F3),
            )
        });
        if open {
            self.pick_and_open();
        }
        if close {
            if let Some(id) = self.state.active_id() {
                self.state.close_tab(id);
            }
        }
        if next {
            self.state.next_match();
        }
        if previous {
            self.state.previous_match();
        }
    }
}

impl eframe::App for SpyglassApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let dropped = ctx.input(|i| i.raw.dropped_files.first().and_then(|f| f.path.clone()));
        if let Some(path) = dropped {
            self.open_file(&path);
        }

        if let Some(snapshot) = self.state.poll(Instant::now()) {
            self.loading = Some(snapshot);
        }
        self.notices.extend(self.state.take_notices());

        self.handle_shortcuts(ctx);
        self.show_menu(ctx);
        self.show_tabs(ctx);
        self.show_toolbar(ctx);
        self.show_status(ctx);
        self.show_notices(ctx);

        egui::CentralPanel::default()
            .frame(egui::Frame::none())
            .show(ctx, |ui| HexPanel::show(ui, &mut self.state));

        // Chunk arrivals repaint on their own; job progress is polled.
        if self.any_job_running() || self.loading.is_some_and(|l| l.is_loading()) {
            ctx.request_repaint_after(JOB_POLL_INTERVAL);
        }
    }
}
