use anyhow::{
    Context,
    Result,
    anyhow,
};
use chrono::Utc;
use serde::{
    Deserialize,
    Serialize,
};
use std::{
    fmt,
    fs,
    io::Write,
    path::{
        Path,
        PathBuf,
    },
    str::FromStr,
    time::Duration,
};
use tracker::{
    OperationKind,
    SweepConfig,
    TrackOptions,
};

pub const DEFAULT_PROFILE_ROOT: &str = "~/.panel-dashboard";
const PROFILE_FILE: &str = "profile.json";
const LOCAL_BASE_URL: &str = "http://127.0.0.1:8080";

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Environment {
    #[default]
    Production,
    Staging,
    Local,
}

impl Environment {
    pub fn dir_name(self) -> &'static str {
        match self {
            Environment::Production => "production",
            Environment::Staging => "staging",
            Environment::Local => "local",
        }
    }

    /// Only the local environment has a well-known address; the hosted ones come from the
    /// profile or `--base-url`.
    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            Environment::Local => Some(LOCAL_BASE_URL),
            Environment::Production | Environment::Staging => None,
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Production => "Production",
            Environment::Staging => "Staging",
            Environment::Local => "Local",
        };
        write!(f, "{name}")
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "staging" | "stage" => Ok(Environment::Staging),
            "local" => Ok(Environment::Local),
            other => Err(format!(
                "unknown environment '{other}'; expected production, staging or local"
            )),
        }
    }
}

/// Poll and sweep timings, stored per environment so slow panels can be tuned without a rebuild.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerTuning {
    pub poll_interval_ms: u64,
    pub fast_poll_interval_ms: u64,
    pub max_attempts: u32,
    pub max_duration_secs: u64,
    pub sweep_interval_secs: u64,
    pub sweep_page_size: u32,
}

impl Default for TrackerTuning {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            fast_poll_interval_ms: 1000,
            max_attempts: 150,
            max_duration_secs: 300,
            sweep_interval_secs: 5,
            sweep_page_size: 10,
        }
    }
}

impl TrackerTuning {
    /// Options for one tracked operation. Kinds that poll faster by default keep doing so.
    pub fn track_options(&self, kind: OperationKind) -> TrackOptions {
        let fast = TrackOptions::for_kind(kind).interval < TrackOptions::default().interval;
        let interval_ms = if fast {
            self.fast_poll_interval_ms
        } else {
            self.poll_interval_ms
        };
        TrackOptions::for_kind(kind)
            .with_interval(Duration::from_millis(interval_ms))
            .with_max_attempts(self.max_attempts)
            .with_max_duration(Duration::from_secs(self.max_duration_secs))
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            interval: Duration::from_secs(self.sweep_interval_secs),
            track: self.track_options(OperationKind::GatewayDeposit),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub base_url: Option<String>,
    pub phone: Option<String>,
    pub updated_at: Option<String>,
    pub tracker: TrackerTuning,
}

impl Profile {
    /// `--base-url` wins over the stored URL, which wins over the environment default.
    pub fn resolve_base_url(&self, env: Environment, flag: Option<&str>) -> Result<String> {
        flag.map(str::to_string)
            .or_else(|| self.base_url.clone())
            .or_else(|| env.default_base_url().map(str::to_string))
            .ok_or_else(|| {
                anyhow!("No panel URL configured for {env}; pass --base-url <url> once to save one")
            })
    }

    pub fn touch(&mut self) {
        self.updated_at = Some(Utc::now().to_rfc3339());
    }
}

#[derive(Debug)]
pub struct ProfileStore {
    path: PathBuf,
}

impl ProfileStore {
    /// Opens `<root>/<env>/profile.json`, creating it when missing. `root` defaults to
    /// [`DEFAULT_PROFILE_ROOT`] and may start with `~`.
    pub fn open(root: Option<&str>, env: Environment) -> Result<Self> {
        let root = resolve_root(root);
        let path = ensure_store(&root, env)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<Profile> {
        Ok(read_profile(&self.path)?.unwrap_or_default())
    }

    pub fn save(&self, profile: &Profile) -> Result<()> {
        write_profile(&self.path, profile)
    }
}

fn resolve_root(root: Option<&str>) -> PathBuf {
    let raw = root.unwrap_or(DEFAULT_PROFILE_ROOT);
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

fn ensure_store(root: &Path, env: Environment) -> Result<PathBuf> {
    let env_dir = root.join(env.dir_name());
    if !env_dir.exists() {
        fs::create_dir_all(&env_dir).with_context(|| {
            format!("Failed to create profile directory {}", env_dir.display())
        })?;
    }

    let file_path = env_dir.join(PROFILE_FILE);
    if !file_path.exists() {
        let mut file = fs::File::create(&file_path).with_context(|| {
            format!("Failed to create profile file for {} at {:?}", env, file_path)
        })?;
        file.write_all(b"")
            .with_context(|| format!("Failed to initialize profile file for {}", env))?;
    }

    Ok(file_path)
}

fn read_profile(path: impl AsRef<Path>) -> Result<Option<Profile>> {
    let data = fs::read(path.as_ref()).context("Failed to read profile")?;
    if data.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    let profile = serde_json::from_slice::<Profile>(&data)
        .context("Failed to parse profile JSON; expected a single profile object")?;
    Ok(Some(profile))
}

fn write_profile(path: impl AsRef<Path>, profile: &Profile) -> Result<()> {
    let json = serde_json::to_vec_pretty(profile).context("Failed to serialize profile")?;
    fs::write(path.as_ref(), json).context("Failed to write profile")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    struct ScratchDir(PathBuf);

    impl ScratchDir {
        fn new(name: &str) -> Self {
            let path = std::env::temp_dir()
                .join(format!("panel-profiles-{name}-{}", std::process::id()));
            let _ = fs::remove_dir_all(&path);
            Self(path)
        }

        fn root(&self) -> &str {
            self.0.to_str().unwrap()
        }
    }

    impl Drop for ScratchDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    #[test]
    fn open__fresh_root__creates_empty_profile_file() {
        // given
        let scratch = ScratchDir::new("fresh");

        // when
        let store = ProfileStore::open(Some(scratch.root()), Environment::Staging).unwrap();

        // then
        assert!(store.path().ends_with("staging/profile.json"));
        assert_eq!(fs::read(store.path()).unwrap(), b"");
        assert_eq!(store.load().unwrap(), Profile::default());
    }

    #[test]
    fn save__then_load__keeps_url_phone_and_tuning() {
        // given
        let scratch = ScratchDir::new("save");
        let store = ProfileStore::open(Some(scratch.root()), Environment::Local).unwrap();
        let mut profile = Profile {
            base_url: Some("http://panel.test".to_string()),
            phone: Some("9990001111".to_string()),
            ..Profile::default()
        };
        profile.tracker.sweep_interval_secs = 30;
        profile.touch();

        // when
        store.save(&profile).unwrap();
        let loaded = store.load().unwrap();

        // then
        assert_eq!(loaded, profile);
        assert!(loaded.updated_at.is_some());
    }

    #[test]
    fn load__partial_profile__fills_defaults() {
        // given
        let scratch = ScratchDir::new("partial");
        let store = ProfileStore::open(Some(scratch.root()), Environment::Production).unwrap();
        fs::write(store.path(), br#"{"phone":"9990001111","tracker":{"max_attempts":3}}"#)
            .unwrap();

        // when
        let profile = store.load().unwrap();

        // then
        assert_eq!(profile.phone.as_deref(), Some("9990001111"));
        assert_eq!(profile.tracker.max_attempts, 3);
        assert_eq!(profile.tracker.poll_interval_ms, 2000);
        assert_eq!(profile.base_url, None);
    }

    #[test]
    fn load__garbage__is_an_error() {
        let scratch = ScratchDir::new("garbage");
        let store = ProfileStore::open(Some(scratch.root()), Environment::Local).unwrap();
        fs::write(store.path(), b"not json").unwrap();

        assert!(store.load().is_err());
    }

    #[test]
    fn resolve_base_url__flag_then_profile_then_environment() {
        let stored = Profile {
            base_url: Some("http://stored".to_string()),
            ..Profile::default()
        };
        let empty = Profile::default();

        assert_eq!(
            stored
                .resolve_base_url(Environment::Local, Some("http://flag"))
                .unwrap(),
            "http://flag"
        );
        assert_eq!(
            stored.resolve_base_url(Environment::Local, None).unwrap(),
            "http://stored"
        );
        assert_eq!(
            empty.resolve_base_url(Environment::Local, None).unwrap(),
            LOCAL_BASE_URL
        );
        assert!(empty.resolve_base_url(Environment::Production, None).is_err());
    }

    #[test]
    fn track_options__keeps_faster_interval_for_fast_kinds() {
        // given
        let tuning = TrackerTuning {
            poll_interval_ms: 3000,
            fast_poll_interval_ms: 500,
            max_attempts: 7,
            ..TrackerTuning::default()
        };

        // when
        let deposit = tuning.track_options(OperationKind::SubAccountDeposit);
        let creation = tuning.track_options(OperationKind::SubAccountCreation);

        // then
        assert_eq!(deposit.interval, Duration::from_millis(500));
        assert_eq!(creation.interval, Duration::from_millis(3000));
        assert_eq!(creation.max_attempts, 7);
        assert_eq!(creation.max_duration, Duration::from_secs(300));
    }

    #[test]
    fn sweep_config__defaults__match_tracker_defaults() {
        let config = TrackerTuning::default().sweep_config();

        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.track, TrackOptions::default());
    }

    #[test]
    fn environment__parses_names_and_aliases() {
        assert_eq!("prod".parse::<Environment>(), Ok(Environment::Production));
        assert_eq!("Staging".parse::<Environment>(), Ok(Environment::Staging));
        assert_eq!("local".parse::<Environment>(), Ok(Environment::Local));
        assert!("moon".parse::<Environment>().is_err());
    }
}
