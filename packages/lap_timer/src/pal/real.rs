use std::time::Instant;

use crate::pal::Platform;

/// The platform that the build is targeting.
#[derive(Debug, Default)]
pub(crate) struct BuildTargetPlatform;

pub(crate) static BUILD_TARGET_PLATFORM: BuildTargetPlatform = BuildTargetPlatform;

impl Platform for BuildTargetPlatform {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }
}
