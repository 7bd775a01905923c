/// Host kernel used for the reference FMA.
///
/// `Auto` resolves to the widest instruction set the running CPU supports
/// (see [`detect_best_kernel`](crate::utilities::helpers::detect_best_kernel)).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Kernel {
	Auto,
	Scalar,
	Avx2,
	Avx512,
}

impl Default for Kernel {
	fn default() -> Self {
		Kernel::Auto
	}
}

impl Kernel {
	pub const fn name(self) -> &'static str {
		match self {
			Kernel::Auto => "auto",
			Kernel::Scalar => "scalar",
			Kernel::Avx2 => "avx2",
			Kernel::Avx512 => "avx512",
		}
	}
}
