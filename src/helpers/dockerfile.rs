use std::path::Path;

use crate::forms::BuildConfig;

/// File name used for generated Dockerfiles, so a repository's own
/// `Dockerfile` is never overwritten.
pub const GENERATED_DOCKERFILE: &str = "Dockerfile.preview";
const NODE_MANIFEST: &str = "package.json";
const STATIC_PORT: u16 = 80;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// DockerfileBuilder: renders a single-stage Dockerfile
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone)]
pub struct DockerfileBuilder {
    base_image: String,
    work_dir: String,
    copy_sources: Vec<(String, String)>,
    run_commands: Vec<String>,
    expose_ports: Vec<u16>,
    cmd: Vec<String>,
    env_vars: Vec<(String, String)>,
}

impl Default for DockerfileBuilder {
    fn default() -> Self {
        Self {
            base_image: "alpine:3.18".to_string(),
            work_dir: "/app".to_string(),
            copy_sources: Vec::new(),
            run_commands: Vec::new(),
            expose_ports: Vec::new(),
            cmd: Vec::new(),
            env_vars: Vec::new(),
        }
    }
}

impl DockerfileBuilder {
    /// Node image driven by the project's install/build/start commands.
    pub fn node(config: &BuildConfig) -> Self {
        let port = config.port();
        let mut builder = Self::default()
            .base_image("node:20-alpine")
            .work_dir("/app")
            .env("NODE_ENV", "production")
            .env("PORT", port.to_string())
            .copy(".", ".")
            .run(config.install_command());
        if let Some(build) = config.build_command() {
            builder = builder.run(build);
        }
        builder
            .expose(port)
            .cmd(vec![
                "sh".to_string(),
                "-c".to_string(),
                config.start_command().to_string(),
            ])
    }

    /// Plain file server for everything that is not a Node project.
    pub fn static_site() -> Self {
        Self::default()
            .base_image("nginx:alpine")
            .work_dir("/")
            .copy(".", "/usr/share/nginx/html")
            .expose(STATIC_PORT)
    }

    pub fn base_image<S: Into<String>>(mut self, image: S) -> Self {
        self.base_image = image.into();
        self
    }

    pub fn work_dir<S: Into<String>>(mut self, dir: S) -> Self {
        self.work_dir = dir.into();
        self
    }

    pub fn copy<S: Into<String>>(mut self, src: S, dest: S) -> Self {
        self.copy_sources.push((src.into(), dest.into()));
        self
    }

    pub fn run<S: Into<String>>(mut self, cmd: S) -> Self {
        self.run_commands.push(cmd.into());
        self
    }

    pub fn expose(mut self, port: u16) -> Self {
        self.expose_ports.push(port);
        self
    }

    pub fn cmd(mut self, parts: Vec<String>) -> Self {
        self.cmd = parts;
        self
    }

    pub fn env<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Render the Dockerfile contents as a `String`.
    pub fn build(&self) -> String {
        let mut lines: Vec<String> = Vec::new();

        lines.push(format!("FROM {}", self.base_image));
        lines.push(String::new());

        if self.work_dir != "/" {
            lines.push(format!("WORKDIR {}", self.work_dir));
            lines.push(String::new());
        }

        for (k, v) in &self.env_vars {
            lines.push(format!("ENV {}={}", k, v));
        }
        if !self.env_vars.is_empty() {
            lines.push(String::new());
        }

        // Sources first, then the commands that need them.
        for (src, dest) in &self.copy_sources {
            lines.push(format!("COPY {} {}", src, dest));
        }
        if !self.copy_sources.is_empty() {
            lines.push(String::new());
        }

        for cmd in &self.run_commands {
            lines.push(format!("RUN {}", cmd));
        }
        if !self.run_commands.is_empty() {
            lines.push(String::new());
        }

        for port in &self.expose_ports {
            lines.push(format!("EXPOSE {}", port));
        }
        if !self.expose_ports.is_empty() {
            lines.push(String::new());
        }

        if !self.cmd.is_empty() {
            let quoted: Vec<String> = self
                .cmd
                .iter()
                .map(|p| format!("\"{}\"", p.replace('\\', "\\\\").replace('"', "\\\"")))
                .collect();
            lines.push(format!("CMD [{}]", quoted.join(", ")));
        }

        while lines.last().map_or(false, |l| l.is_empty()) {
            lines.pop();
        }

        lines.push(String::new()); // final newline
        lines.join("\n")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BuildInputs: which Dockerfile to hand to the platform
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerfileSource {
    /// Path configured on the project and present in the checkout.
    Configured,
    GeneratedNode,
    GeneratedStatic,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInputs {
    /// Dockerfile path relative to the checkout root.
    pub dockerfile: String,
    pub source: DockerfileSource,
    pub internal_port: u16,
}

/// Decide on the Dockerfile for a checkout, writing a generated one into the
/// checkout when the project has none (or the configured one is missing).
pub fn prepare_build_inputs(checkout: &Path, config: &BuildConfig) -> Result<BuildInputs, String> {
    if let Some(path) = config.dockerfile_path() {
        if checkout.join(path).is_file() {
            return Ok(BuildInputs {
                dockerfile: path.to_string(),
                source: DockerfileSource::Configured,
                internal_port: config.port(),
            });
        }
        tracing::warn!(path, "configured Dockerfile not found in checkout, generating one");
    }

    let (builder, source, port) = if checkout.join(NODE_MANIFEST).is_file() {
        (
            DockerfileBuilder::node(config),
            DockerfileSource::GeneratedNode,
            config.port(),
        )
    } else {
        (
            DockerfileBuilder::static_site(),
            DockerfileSource::GeneratedStatic,
            STATIC_PORT,
        )
    };

    std::fs::write(checkout.join(GENERATED_DOCKERFILE), builder.build())
        .map_err(|err| format!("failed to write Dockerfile: {}", err))?;

    Ok(BuildInputs {
        dockerfile: GENERATED_DOCKERFILE.to_string(),
        source,
        internal_port: port,
    })
}
