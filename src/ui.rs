use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::{Duration, Instant};

/// `--ui` flag of the sentinel binaries.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum UiMode {
    #[default]
    Auto,
    Plain,
    Pretty,
}

/// Stderr progress reporting. Pretty output only on a terminal, and in `auto` mode only
/// when stdout is not being piped somewhere that expects clean output.
#[derive(Clone, Debug)]
pub struct Ui {
    pretty: bool,
}

impl Ui {
    pub fn new(mode: UiMode, stderr_is_tty: bool, stdout_is_tty: bool) -> Self {
        let pretty = stderr_is_tty
            && match mode {
                UiMode::Pretty => true,
                UiMode::Auto => stdout_is_tty,
                UiMode::Plain => false,
            };
        Self { pretty }
    }

    pub fn detect(mode: UiMode) -> Self {
        use std::io::IsTerminal;
        Self::new(
            mode,
            std::io::stderr().is_terminal(),
            std::io::stdout().is_terminal(),
        )
    }

    fn spinner(&self, message: String) -> Option<ProgressBar> {
        if !self.pretty {
            return None;
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_draw_target(ProgressDrawTarget::stderr());
        spinner.enable_steady_tick(Duration::from_millis(120));
        let style = ProgressStyle::with_template("{spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        spinner.set_style(style);
        spinner.set_message(message);
        Some(spinner)
    }

    /// Timed step; reports completion when the guard drops.
    pub fn stage(&self, name: &str) -> StageGuard {
        let spinner = self.spinner(format!("{name}…"));
        if spinner.is_none() {
            eprintln!("==> {}", name);
        }
        StageGuard {
            name: name.to_string(),
            start: Instant::now(),
            spinner,
        }
    }

    /// Live status line for the daemon: frame rate, alerts and detection state.
    pub fn status(&self) -> StatusLine {
        StatusLine {
            spinner: self.spinner("starting…".to_string()),
            window_start: Instant::now(),
            window_frames: 0,
            fps: 0.0,
        }
    }
}

pub struct StageGuard {
    name: String,
    start: Instant,
    spinner: Option<ProgressBar>,
}

impl Drop for StageGuard {
    fn drop(&mut self) {
        let message = format!("✔ {} ({})", self.name, format_duration(self.start.elapsed()));
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message),
            None => eprintln!("{message}"),
        }
    }
}

pub struct StatusLine {
    spinner: Option<ProgressBar>,
    window_start: Instant,
    window_frames: u32,
    fps: f64,
}

impl StatusLine {
    /// Counts one displayed frame; the rate is recomputed once a second.
    pub fn frame(&mut self) {
        self.window_frames += 1;
        let elapsed = self.window_start.elapsed();
        if elapsed >= Duration::from_secs(1) {
            self.fps = self.window_frames as f64 / elapsed.as_secs_f64();
            self.window_frames = 0;
            self.window_start = Instant::now();
        }
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn update(&self, state: &str, alerts: usize, last_level: Option<&str>) {
        if let Some(spinner) = &self.spinner {
            spinner.set_message(format!(
                "{} | {:.1} fps | {} alert(s) | last: {}",
                state,
                self.fps,
                alerts,
                last_level.unwrap_or("-")
            ));
        }
    }

    /// Prints a line above the status without disturbing it.
    pub fn println(&self, line: &str) {
        match &self.spinner {
            Some(spinner) => spinner.println(line),
            None => eprintln!("{line}"),
        }
    }

    pub fn finish(&self, message: &str) {
        match &self.spinner {
            Some(spinner) => spinner.finish_with_message(message.to_string()),
            None => eprintln!("{message}"),
        }
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs() >= 1 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{}ms", duration.as_millis())
    }
}
