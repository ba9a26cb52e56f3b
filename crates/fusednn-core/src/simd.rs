//! Runtime SIMD level detection and the f32 squared-norm kernel.
//!
//! Norm precomputation is the only hot loop outside the tile kernel. It runs
//! once per row, so a single AVX2+FMA kernel with a scalar fallback covers it.

// =============================================================================
// Cached SIMD Level Detection
// =============================================================================

/// SIMD capability level detected at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimdLevel {
    /// AVX2 + FMA available (x86_64 only).
    Avx2,
    /// Scalar fallback.
    Scalar,
}

/// Cached SIMD level - detected once at first use.
static SIMD_LEVEL: std::sync::OnceLock<SimdLevel> = std::sync::OnceLock::new();

fn detect_simd_level() -> SimdLevel {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("avx2") && is_x86_feature_detected!("fma") {
            return SimdLevel::Avx2;
        }
    }

    SimdLevel::Scalar
}

/// Returns the cached SIMD capability level.
#[inline]
#[must_use]
pub fn simd_level() -> SimdLevel {
    *SIMD_LEVEL.get_or_init(detect_simd_level)
}

// =============================================================================
// Squared norm
// =============================================================================

/// Squared L2 norm of an f32 row with automatic dispatch.
#[inline]
#[must_use]
pub fn squared_norm_f32(v: &[f32]) -> f32 {
    match simd_level() {
        // SAFETY: `simd_level()` returned Avx2, so AVX2+FMA were detected at runtime.
        #[cfg(target_arch = "x86_64")]
        SimdLevel::Avx2 if v.len() >= 8 => unsafe { squared_norm_avx2(v) },
        _ => squared_norm_scalar(v),
    }
}

/// Scalar reference implementation.
#[inline]
#[must_use]
pub fn squared_norm_scalar(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum()
}

/// AVX2 squared norm with 2 accumulators.
///
/// # Safety
///
/// Caller must ensure the CPU supports AVX2+FMA.
#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "avx2", enable = "fma")]
unsafe fn squared_norm_avx2(v: &[f32]) -> f32 {
    // SAFETY: Shared SIMD invariants.
    // - Condition 1: every load reads 8 lanes at `offset` with `offset + 8 <= len`.
    // - Condition 2: `_mm256_loadu_ps` permits unaligned addresses.
    // Reason: FMA accumulation is the hot path of norm precomputation.
    use std::arch::x86_64::*;

    let len = v.len();
    let ptr = v.as_ptr();
    let pairs = len / 16;

    let mut sum0 = _mm256_setzero_ps();
    let mut sum1 = _mm256_setzero_ps();

    for i in 0..pairs {
        let offset = i * 16;
        let a = _mm256_loadu_ps(ptr.add(offset));
        let b = _mm256_loadu_ps(ptr.add(offset + 8));
        sum0 = _mm256_fmadd_ps(a, a, sum0);
        sum1 = _mm256_fmadd_ps(b, b, sum1);
    }

    let mut base = pairs * 16;
    if len - base >= 8 {
        let a = _mm256_loadu_ps(ptr.add(base));
        sum0 = _mm256_fmadd_ps(a, a, sum0);
        base += 8;
    }

    let combined = _mm256_add_ps(sum0, sum1);
    let hi = _mm256_extractf128_ps(combined, 1);
    let lo = _mm256_castps256_ps128(combined);
    let sum128 = _mm_add_ps(lo, hi);
    let shuf = _mm_movehdup_ps(sum128);
    let sums = _mm_add_ps(sum128, shuf);
    let shuf2 = _mm_movehl_ps(sums, sums);
    let mut result = _mm_cvtss_f32(_mm_add_ss(sums, shuf2));

    for &x in &v[base..] {
        result += x * x;
    }
    result
}
