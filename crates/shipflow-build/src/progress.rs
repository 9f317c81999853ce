use indicatif::{ProgressBar, ProgressStyle};

pub struct BuildProgress {
    progress_bar: ProgressBar,
}

impl BuildProgress {
    pub fn new(pipeline_name: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap(),
        );
        pb.set_message(format!("Building {}...", pipeline_name));

        Self { progress_bar: pb }
    }

    pub fn step(&self, index: usize, total: usize, kind: &str) {
        self.progress_bar
            .set_message(format!("Step {}/{}: {}", index + 1, total, kind));
    }

    pub fn finish_success(&self, digest: &str) {
        self.progress_bar
            .finish_with_message(format!("Build completed ✓ ({})", digest));
    }

    pub fn finish_error(&self, error: &str) {
        self.progress_bar
            .finish_with_message(format!("Build failed: {}", error));
    }
}
