pub mod test_helpers {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
    use std::time::{Duration, Instant};

    use crate::pdf::{
        DocumentSource, OpenDocument, QualityTier, RawBitmap, RenderConfig, RenderError,
        Rasterizer, Smoothing,
    };

    /// Page size at scale 1.0
    pub const BASE_WIDTH: u32 = 200;
    pub const BASE_HEIGHT: u32 = 250;

    /// Long enough to outlive every timeout in [`fast_config`]
    const HANG: Duration = Duration::from_secs(30);

    /// What a scripted render does
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Behavior {
        Succeed,
        Fail,
        /// Never answer within any test timeout
        Hang,
    }

    /// One call into the scripted rasterizer
    #[derive(Clone, Copy, Debug)]
    pub struct RenderCall {
        pub page: u32,
        pub smoothing: Smoothing,
        pub scale: f32,
        pub started: Instant,
    }

    impl RenderCall {
        #[must_use]
        pub fn tier(&self) -> QualityTier {
            match self.smoothing {
                Smoothing::Medium => QualityTier::Preview,
                Smoothing::High => QualityTier::Final,
            }
        }
    }

    #[derive(Default)]
    struct Script {
        page_count: u32,
        open_delay: Duration,
        open_fails: bool,
        tier_delay: HashMap<Smoothing, Duration>,
        page_delay: HashMap<(u32, Smoothing), Duration>,
        behavior: HashMap<(u32, Smoothing), Behavior>,
    }

    /// In-memory rasterizer driven by a script of delays and failures.
    ///
    /// Clones share the script and the call log, so a test can keep one
    /// handle and give another to the session.
    #[derive(Clone)]
    pub struct ScriptedRasterizer {
        script: Arc<Mutex<Script>>,
        calls: Arc<Mutex<Vec<RenderCall>>>,
        opens: Arc<AtomicUsize>,
        epoch: Instant,
    }

    fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
        mutex.lock().unwrap_or_else(PoisonError::into_inner)
    }

    impl ScriptedRasterizer {
        pub fn new(page_count: u32) -> Self {
            Self {
                script: Arc::new(Mutex::new(Script {
                    page_count,
                    ..Script::default()
                })),
                calls: Arc::new(Mutex::new(Vec::new())),
                opens: Arc::new(AtomicUsize::new(0)),
                epoch: Instant::now(),
            }
        }

        /// Delay every render of `tier`
        pub fn with_tier_delay(self, tier: QualityTier, delay: Duration) -> Self {
            lock(&self.script).tier_delay.insert(tier.smoothing(), delay);
            self
        }

        /// Delay renders of one page and tier, overriding the tier delay
        pub fn with_page_delay(self, page: u32, tier: QualityTier, delay: Duration) -> Self {
            lock(&self.script)
                .page_delay
                .insert((page, tier.smoothing()), delay);
            self
        }

        pub fn with_open_delay(self, delay: Duration) -> Self {
            lock(&self.script).open_delay = delay;
            self
        }

        pub fn failing_open(self) -> Self {
            lock(&self.script).open_fails = true;
            self
        }

        pub fn failing(self, page: u32, tier: QualityTier) -> Self {
            self.set_behavior(page, tier, Behavior::Fail);
            self
        }

        pub fn hanging(self, page: u32, tier: QualityTier) -> Self {
            self.set_behavior(page, tier, Behavior::Hang);
            self
        }

        /// Change a page's behavior while a session is running
        pub fn set_behavior(&self, page: u32, tier: QualityTier, behavior: Behavior) {
            lock(&self.script)
                .behavior
                .insert((page, tier.smoothing()), behavior);
        }

        pub fn set_open_fails(&self, fails: bool) {
            lock(&self.script).open_fails = fails;
        }

        pub fn calls(&self) -> Vec<RenderCall> {
            lock(&self.calls).clone()
        }

        /// Renders started for one page and tier
        pub fn render_count(&self, page: u32, tier: QualityTier) -> usize {
            lock(&self.calls)
                .iter()
                .filter(|c| c.page == page && c.tier() == tier)
                .count()
        }

        /// First render of a page and tier, relative to construction
        pub fn first_call_at(&self, page: u32, tier: QualityTier) -> Option<Duration> {
            lock(&self.calls)
                .iter()
                .find(|c| c.page == page && c.tier() == tier)
                .map(|c| c.started.duration_since(self.epoch))
        }

        pub fn open_count(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }

        pub fn into_shared(self) -> Arc<dyn Rasterizer> {
            Arc::new(self)
        }
    }

    struct ScriptedDocument {
        rasterizer: ScriptedRasterizer,
        page_count: u32,
    }

    impl Rasterizer for ScriptedRasterizer {
        fn open(&self, _source: &DocumentSource) -> Result<Box<dyn OpenDocument>, RenderError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let (delay, fails, page_count) = {
                let script = lock(&self.script);
                (script.open_delay, script.open_fails, script.page_count)
            };
            std::thread::sleep(delay);
            if fails {
                return Err(RenderError::unreadable("scripted open failure"));
            }
            Ok(Box::new(ScriptedDocument {
                rasterizer: self.clone(),
                page_count,
            }))
        }
    }

    impl OpenDocument for ScriptedDocument {
        fn page_count(&self) -> u32 {
            self.page_count
        }

        fn render_page(
            &self,
            page: u32,
            scale: f32,
            smoothing: Smoothing,
        ) -> Result<RawBitmap, RenderError> {
            lock(&self.rasterizer.calls).push(RenderCall {
                page,
                smoothing,
                scale,
                started: Instant::now(),
            });

            let (delay, behavior) = {
                let script = lock(&self.rasterizer.script);
                let delay = script
                    .page_delay
                    .get(&(page, smoothing))
                    .or_else(|| script.tier_delay.get(&smoothing))
                    .copied()
                    .unwrap_or_default();
                let behavior = script
                    .behavior
                    .get(&(page, smoothing))
                    .copied()
                    .unwrap_or(Behavior::Succeed);
                (delay, behavior)
            };

            std::thread::sleep(delay);
            match behavior {
                Behavior::Succeed => Ok(RawBitmap::solid(
                    (BASE_WIDTH as f32 * scale).round() as u32,
                    (BASE_HEIGHT as f32 * scale).round() as u32,
                    [0xff, 0xff, 0xff],
                )),
                Behavior::Fail => Err(RenderError::failure(page, "scripted failure")),
                Behavior::Hang => {
                    std::thread::sleep(HANG);
                    Err(RenderError::failure(page, "scripted hang"))
                }
            }
        }
    }

    /// Default budgets scaled down tenfold
    pub fn fast_config() -> RenderConfig {
        RenderConfig {
            metadata_timeout: Duration::from_millis(1_000),
            preview_timeout: Duration::from_millis(500),
            final_timeout: Duration::from_millis(1_200),
            upgrade_delay: Duration::from_millis(50),
            prefetch_delay: Duration::from_millis(150),
            notice_duration: Duration::from_millis(200),
            ..RenderConfig::default()
        }
    }

    /// Wait until `check` holds, polling every few milliseconds
    pub fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        check()
    }
}
