use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::transfer::TransferEvent;

/// Prints receiver events as status lines, with a progress bar per file
pub struct ConsoleRenderer {
    target: fn() -> ProgressDrawTarget,
    bar: Option<ProgressBar>,
}

impl ConsoleRenderer {
    fn new() -> Self {
        Self {
            target: ProgressDrawTarget::stderr,
            bar: None,
        }
    }

    pub fn render(&mut self, event: &TransferEvent) {
        match event {
            TransferEvent::FileOpened { name, size } if *size > 0 => {
                let bar = ProgressBar::with_draw_target(Some(*size), (self.target)());
                bar.set_style(bar_style());
                bar.set_message(name.clone());
                self.bar = Some(bar);
            }
            TransferEvent::Progress { received, .. } => {
                if let Some(bar) = &self.bar {
                    bar.set_position(*received);
                }
            }
            TransferEvent::FileReceived { .. } | TransferEvent::Completed { .. } => {
                if let Some(bar) = self.bar.take() {
                    bar.finish_and_clear();
                }
                self.print(event);
            }
            TransferEvent::Aborted { .. } => {
                if let Some(bar) = self.bar.take() {
                    bar.abandon();
                }
                eprintln!("{}", event);
            }
            _ => self.print(event),
        }
    }

    fn print(&self, event: &TransferEvent) {
        if status_line(event).is_none() {
            return;
        }
        match &self.bar {
            Some(bar) => bar.println(event.to_string()),
            None => println!("{}", event),
        }
    }
}

/// Events worth a line of their own; the rest only move the progress bar
pub fn status_line(event: &TransferEvent) -> Option<String> {
    match event {
        TransferEvent::FileOpened { .. } | TransferEvent::Progress { .. } => None,
        other => Some(other.to_string()),
    }
}

/// Render events until every sender is gone
pub async fn render_events(mut events: UnboundedReceiver<TransferEvent>) {
    let mut renderer = ConsoleRenderer::new();
    while let Some(event) = events.recv().await {
        renderer.render(&event);
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} @ {bytes_per_sec}")
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}
