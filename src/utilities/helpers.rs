use std::sync::OnceLock;

use crate::utilities::enums::Kernel;

static BEST_SINGLE: OnceLock<Kernel> = OnceLock::new();

#[inline(always)]
pub fn detect_best_kernel() -> Kernel {
    *BEST_SINGLE.get_or_init(|| {
        #[cfg(target_arch = "x86_64")]
        {
            #[cfg(feature = "nightly-avx")]
            if is_x86_feature_detected!("avx512f") && is_x86_feature_detected!("fma") {
                return Kernel::Avx512;
            }
            if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
                return Kernel::Avx2;
            }
        }
        Kernel::Scalar
    })
}

/// Resolves `Auto` and downgrades a SIMD request the CPU (or the build) cannot honor.
#[inline]
pub fn resolve_kernel(requested: Kernel) -> Kernel {
    match requested {
        Kernel::Auto => detect_best_kernel(),
        Kernel::Scalar => Kernel::Scalar,
        k if kernel_supported(k) => k,
        k => {
            tracing::warn!(requested = k.name(), "host kernel unsupported here, using scalar");
            Kernel::Scalar
        }
    }
}

#[inline]
pub fn kernel_supported(kernel: Kernel) -> bool {
    match kernel {
        Kernel::Auto | Kernel::Scalar => true,
        #[cfg(target_arch = "x86_64")]
        Kernel::Avx2 => is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma"),
        #[cfg(all(feature = "nightly-avx", target_arch = "x86_64"))]
        Kernel::Avx512 => is_x86_feature_detected!("avx512f"),
        #[allow(unreachable_patterns)]
        _ => false,
    }
}

/// Number of blocks needed to cover `n` items, i.e. `ceil(n / threads_per_block)`.
#[inline]
pub fn blocks_for(n: usize, threads_per_block: u32) -> usize {
    debug_assert!(threads_per_block > 0);
    n.div_ceil(threads_per_block as usize)
}
