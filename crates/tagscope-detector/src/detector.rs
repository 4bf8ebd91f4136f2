//! Detector lifecycle: construction, family registration and teardown.

use std::ffi::CString;
use std::fmt;

use log::{debug, warn};
use tagscope_ffi::{DetectorKind, Engine, FamilyKind, Owned, SearchPaths};

use crate::error::DetectError;
use crate::options::{DetectorConfig, DetectorOptions};

/// Outcome of [`Detector::add_family`].
#[must_use]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FamilyRegistration {
    Registered,
    /// The engine does not know the name; nothing was registered.
    Unrecognized,
}

impl FamilyRegistration {
    pub fn is_registered(self) -> bool {
        self == Self::Registered
    }
}

/// A configured detector instance.
///
/// Owns the foreign detector handle and every family descriptor registered
/// with it. The handle is released before the families, either by
/// [`destroy`](Self::destroy) or on drop.
///
/// A `Detector` can move between threads but is not `Sync`: each instance
/// serves one call at a time. Use one detector per thread for parallelism.
pub struct Detector {
    engine: Engine,
    handle: Option<Owned<DetectorKind>>,
    families: Vec<Owned<FamilyKind>>,
    available: Vec<String>,
    options: DetectorOptions,
}

// SAFETY: the handle and family descriptors are only touched through
// `&self`/`&mut self`, and `Detector` is not `Sync`, so no two threads ever
// use the same engine objects concurrently. The engine keeps no
// thread-affine state per detector.
unsafe impl Send for Detector {}

impl Detector {
    /// Load the engine from `paths` and construct a detector.
    pub fn new(options: DetectorOptions, paths: &SearchPaths) -> Result<Self, DetectError> {
        options.validate()?;
        let engine = Engine::load(paths)?;
        Self::with_engine(engine, options)
    }

    /// Construct a detector on an already resolved engine.
    ///
    /// Options are validated before any engine call. Unrecognized family
    /// names are skipped with a warning.
    pub fn with_engine(engine: Engine, options: DetectorOptions) -> Result<Self, DetectError> {
        options.validate()?;
        let available = engine.family_names()?;

        // SAFETY: `detector_create` has no preconditions.
        let raw = unsafe { (engine.api().detector_create)() };
        // SAFETY: fresh allocation from this engine.
        let handle = unsafe { Owned::<DetectorKind>::from_raw(&engine, raw) }?;

        // From here on the detector's own teardown order applies on any
        // early return.
        let mut detector = Self {
            engine,
            handle: Some(handle),
            families: Vec::new(),
            available,
            options,
        };
        detector.configure()?;

        for name in detector.options.families.resolve(&detector.available) {
            let _ = detector.add_family(&name)?;
        }
        let count = detector.families.len();
        debug!(
            "detector ready with {count} famil{} ({} compiled in)",
            if count == 1 { "y" } else { "ies" },
            detector.available.len()
        );
        Ok(detector)
    }

    fn configure(&mut self) -> Result<(), DetectError> {
        let config = self.options.config();
        let enable_quad_contours = self.engine.api().detector_enable_quad_contours;
        let handle = self.handle.as_mut().ok_or(DetectError::Destroyed)?;
        config.apply(handle.raw_mut());
        if config.quad_contours {
            // SAFETY: live handle from this engine.
            unsafe { enable_quad_contours(handle.as_ptr(), 1) };
        }
        Ok(())
    }

    /// Register a tag family by name.
    ///
    /// The configured border width is written into the descriptor before it
    /// is handed to the detector. Registering an already registered name is
    /// a no-op.
    pub fn add_family(&mut self, name: &str) -> Result<FamilyRegistration, DetectError> {
        let detector_ptr = self.live_handle()?.as_ptr();
        if self.families.iter().any(|f| f.name() == name) {
            return Ok(FamilyRegistration::Registered);
        }

        let Ok(c_name) = CString::new(name) else {
            warn!("tag family name {name:?} contains a NUL byte; skipping");
            return Ok(FamilyRegistration::Unrecognized);
        };
        let api = self.engine.api();
        // SAFETY: `c_name` is NUL-terminated and outlives the call.
        let raw = unsafe { (api.family_create)(c_name.as_ptr()) };
        // SAFETY: fresh allocation (or null) from this engine.
        let Ok(mut family) = (unsafe { Owned::<FamilyKind>::from_raw(&self.engine, raw) }) else {
            warn!(
                "unrecognized tag family name {name:?}; available: {}",
                self.available.join(", ")
            );
            return Ok(FamilyRegistration::Unrecognized);
        };

        family.raw_mut().black_border = self.options.border;
        // SAFETY: both pointers are live; the family outlives the detector
        // handle because `families` is cleared after the handle is released.
        unsafe { (api.detector_add_family)(detector_ptr, family.as_ptr()) };
        debug!("registered tag family {name}");
        self.families.push(family);
        Ok(FamilyRegistration::Registered)
    }

    /// Names of the registered families, in registration order.
    pub fn registered_families(&self) -> Vec<String> {
        self.families.iter().map(|f| f.name()).collect()
    }

    /// Families compiled into the engine, as enumerated at construction.
    pub fn available_families(&self) -> &[String] {
        &self.available
    }

    pub fn options(&self) -> &DetectorOptions {
        &self.options
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Configuration as currently stored on the foreign handle.
    pub fn active_config(&self) -> Result<DetectorConfig, DetectError> {
        Ok(DetectorConfig::read(self.live_handle()?.raw()))
    }

    /// Release the detector handle and then its family descriptors.
    ///
    /// Safe to call any number of times; later calls do nothing.
    pub fn destroy(&mut self) {
        if let Some(handle) = self.handle.take() {
            drop(handle);
            debug!("released detector handle");
        }
        self.families.clear();
    }

    pub fn is_destroyed(&self) -> bool {
        self.handle.is_none()
    }

    pub(crate) fn live_handle(&self) -> Result<&Owned<DetectorKind>, DetectError> {
        self.handle.as_ref().ok_or(DetectError::Destroyed)
    }
}

impl Drop for Detector {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for Detector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Detector")
            .field("engine", &self.engine)
            .field("families", &self.registered_families())
            .field("destroyed", &self.is_destroyed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::FamilySelection;
    use crate::testing;

    fn options(families: &str) -> DetectorOptions {
        DetectorOptions {
            families: FamilySelection::parse(families),
            ..DetectorOptions::default()
        }
    }

    #[test]
    fn registers_requested_families_with_border() {
        let det = Detector::with_engine(
            testing::engine(),
            DetectorOptions {
                border: 2,
                ..options("tag36h11 tag25h9")
            },
        )
        .expect("detector");
        assert_eq!(det.registered_families(), vec!["tag36h11", "tag25h9"]);
        assert_eq!(testing::registered_borders(), vec![2, 2]);
        assert_eq!(testing::stats().families_live, 2);
    }

    #[test]
    fn all_registers_every_compiled_family() {
        let det = Detector::with_engine(testing::engine(), options("all")).expect("detector");
        assert_eq!(det.registered_families().len(), testing::FAMILIES.len());
        assert_eq!(det.available_families().len(), testing::FAMILIES.len());
        assert_eq!(testing::stats().family_lists_live, 0);
    }

    #[test]
    fn unknown_family_is_skipped() {
        let mut det = Detector::with_engine(testing::engine(), options("not_a_real_family"))
            .expect("detector");
        assert!(det.registered_families().is_empty());
        assert_eq!(testing::stats().families_live, 0);

        assert_eq!(
            det.add_family("tag16h5").expect("live"),
            FamilyRegistration::Registered
        );
        assert_eq!(
            det.add_family("tag16h5").expect("live"),
            FamilyRegistration::Registered
        );
        assert_eq!(det.registered_families(), vec!["tag16h5"]);
        assert_eq!(testing::stats().families_live, 1);
    }

    #[test]
    fn config_reaches_the_handle() {
        let det = Detector::with_engine(
            testing::engine(),
            DetectorOptions {
                quad_decimate: 2.0,
                nthreads: 1,
                refine_pose: true,
                ..DetectorOptions::default()
            },
        )
        .expect("detector");
        let config = det.active_config().expect("live");
        assert_eq!(config.quad_decimate, 2.0);
        assert_eq!(config.nthreads, 1);
        assert!(config.refine_pose);
        assert!(config.refine_edges);
        assert!(config.quad_contours);
    }

    #[test]
    fn quad_contours_stays_off_when_disabled() {
        let det = Detector::with_engine(
            testing::engine(),
            DetectorOptions {
                quad_contours: false,
                ..DetectorOptions::default()
            },
        )
        .expect("detector");
        assert!(!det.active_config().expect("live").quad_contours);
    }

    #[test]
    fn invalid_options_fail_before_any_engine_call() {
        let err = Detector::with_engine(
            testing::engine(),
            DetectorOptions {
                nthreads: 0,
                ..DetectorOptions::default()
            },
        )
        .unwrap_err();
        assert!(matches!(err, DetectError::Options(_)));
        assert_eq!(testing::stats(), testing::EngineStats::default());
    }

    #[test]
    fn destroy_is_idempotent_and_releases_detector_first() {
        let mut det = Detector::with_engine(testing::engine(), options("tag36h11 tag16h5"))
            .expect("detector");
        det.destroy();
        det.destroy();
        assert!(det.is_destroyed());
        let stats = testing::stats();
        assert_eq!(stats.detectors_live, 0);
        assert_eq!(stats.detectors_destroyed, 1);
        assert_eq!(stats.families_live, 0);
        assert_eq!(stats.families_released_while_attached, 0);
        drop(det);
        assert_eq!(testing::stats().detectors_destroyed, 1);
    }

    #[test]
    fn destroyed_detector_refuses_work() {
        let mut det =
            Detector::with_engine(testing::engine(), options("tag36h11")).expect("detector");
        det.destroy();
        let err = det.active_config().unwrap_err();
        assert!(matches!(err, DetectError::Destroyed));
        let err = det.add_family("tag25h9").unwrap_err();
        assert!(matches!(err, DetectError::Destroyed));
    }

    #[test]
    fn drop_releases_everything() {
        {
            let _det = Detector::with_engine(testing::engine(), options("all")).expect("detector");
            assert_eq!(testing::stats().detectors_live, 1);
        }
        let stats = testing::stats();
        assert_eq!(stats.detectors_live, 0);
        assert_eq!(stats.families_live, 0);
        assert_eq!(stats.families_released_while_attached, 0);
    }

    #[test]
    fn null_detector_handle_is_an_error() {
        testing::fail_next(testing::FailPoint::DetectorCreate);
        let err = Detector::with_engine(testing::engine(), options("tag36h11")).unwrap_err();
        assert!(matches!(
            err,
            DetectError::Engine(tagscope_ffi::EngineError::NullHandle { what: "detector" })
        ));
        let stats = testing::stats();
        assert_eq!(stats.detectors_live, 0);
        assert_eq!(stats.family_lists_live, 0);
    }

    #[test]
    fn detector_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Detector>();
    }
}
