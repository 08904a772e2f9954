//! Native functions whose arguments live on the operand stack.
//!
//! A trap function's frame starts at `sp`: scalar traps read `x, y, z` from
//! `sp+0..3` and their extra parameters after that. Vector traps reserve
//! `sp+0..return_size` for their results and read parameters above it.

use super::context::FPUContext;
use super::function::FunctionHandle;
use super::VmResult;

pub type TrapFn = fn(&mut FPUContext<'_>, usize, FunctionHandle) -> VmResult<f64>;
pub type TrapSFn = fn(&mut FPUContext<'_>, usize, FunctionHandle) -> VmResult<()>;

pub struct Trap {
    pub name: &'static str,
    pub func: TrapFn,
    /// Total stack arguments, `x, y, z` included.
    pub parameters: usize,
}

pub struct TrapS {
    pub name: &'static str,
    pub func: TrapSFn,
    pub parameters: usize,
    pub return_size: u32,
}

pub static TRAP_TABLE: [Trap; 9] = [
    Trap { name: "f_r", func: f_r, parameters: 3 },
    Trap { name: "f_th", func: f_th, parameters: 3 },
    Trap { name: "f_ph", func: f_ph, parameters: 3 },
    Trap { name: "f_sphere", func: f_sphere, parameters: 4 },
    Trap { name: "f_torus", func: f_torus, parameters: 5 },
    Trap { name: "f_ellipsoid", func: f_ellipsoid, parameters: 6 },
    Trap { name: "f_paraboloid", func: f_paraboloid, parameters: 4 },
    Trap { name: "f_rounded_box", func: f_rounded_box, parameters: 7 },
    Trap { name: "f_superellipsoid", func: f_superellipsoid, parameters: 5 },
];

pub static TRAPS_TABLE: [TrapS; 1] = [TrapS { name: "f_transform", func: f_transform, parameters: 3, return_size: 3 }];

/// Which table a trap name lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapId {
    Scalar(u32),
    Vector(u32),
}

pub fn find_trap(name: &str) -> Option<TrapId> {
    if let Some(k) = TRAP_TABLE.iter().position(|t| t.name == name) {
        return Some(TrapId::Scalar(k as u32));
    }
    TRAPS_TABLE.iter().position(|t| t.name == name).map(|k| TrapId::Vector(k as u32))
}

// ── Scalar traps ─────────────────────────────────────────────────────

struct Frame<'c, 'vm> {
    ctx: &'c FPUContext<'vm>,
    sp: usize,
}

impl Frame<'_, '_> {
    fn x(&self) -> f64 {
        self.ctx.get_local(self.sp)
    }
    fn y(&self) -> f64 {
        self.ctx.get_local(self.sp + 1)
    }
    fn z(&self) -> f64 {
        self.ctx.get_local(self.sp + 2)
    }
    /// Extra parameter `i`, counted after `x, y, z`.
    fn p(&self, i: usize) -> f64 {
        self.ctx.get_local(self.sp + 3 + i)
    }
}

fn f_r(ctx: &mut FPUContext<'_>, sp: usize, _: FunctionHandle) -> VmResult<f64> {
    let a = Frame { ctx, sp };
    Ok((a.x() * a.x() + a.y() * a.y() + a.z() * a.z()).sqrt())
}

fn f_th(ctx: &mut FPUContext<'_>, sp: usize, _: FunctionHandle) -> VmResult<f64> {
    let a = Frame { ctx, sp };
    Ok(a.x().atan2(a.z()))
}

fn f_ph(ctx: &mut FPUContext<'_>, sp: usize, _: FunctionHandle) -> VmResult<f64> {
    let a = Frame { ctx, sp };
    Ok((a.x() * a.x() + a.z() * a.z()).sqrt().atan2(a.y()))
}

fn f_sphere(ctx: &mut FPUContext<'_>, sp: usize, _: FunctionHandle) -> VmResult<f64> {
    let a = Frame { ctx, sp };
    Ok(-a.p(0) + (a.x() * a.x() + a.y() * a.y() + a.z() * a.z()).sqrt())
}

fn f_torus(ctx: &mut FPUContext<'_>, sp: usize, _: FunctionHandle) -> VmResult<f64> {
    let a = Frame { ctx, sp };
    let ring = (a.x() * a.x() + a.z() * a.z()).sqrt() - a.p(0);
    Ok(-a.p(1) + (ring * ring + a.y() * a.y()).sqrt())
}

fn f_ellipsoid(ctx: &mut FPUContext<'_>, sp: usize, _: FunctionHandle) -> VmResult<f64> {
    let a = Frame { ctx, sp };
    let (x, y, z) = (a.x() * a.p(0), a.y() * a.p(1), a.z() * a.p(2));
    Ok((x * x + y * y + z * z).sqrt())
}

fn f_paraboloid(ctx: &mut FPUContext<'_>, sp: usize, _: FunctionHandle) -> VmResult<f64> {
    let a = Frame { ctx, sp };
    let r = -(a.x() * a.x() - a.y() + a.z() * a.z());
    Ok((a.p(0) * r).clamp(-10.0, 10.0))
}

fn f_rounded_box(ctx: &mut FPUContext<'_>, sp: usize, _: FunctionHandle) -> VmResult<f64> {
    let a = Frame { ctx, sp };
    let radius = a.p(0);
    // distance outside the inner box along one axis
    let axis = |v: f64, half: f64| {
        let outer = if v < half - radius { 0.0 } else { v - (half - radius) };
        let inner = if v > radius - half { 0.0 } else { (radius - half) - v };
        inner.max(outer)
    };
    let (x, y, z) = (axis(a.x(), a.p(1)), axis(a.y(), a.p(2)), axis(a.z(), a.p(3)));
    Ok(-radius + (x * x + y * y + z * z).sqrt() - 1e-6)
}

fn f_superellipsoid(ctx: &mut FPUContext<'_>, sp: usize, _: FunctionHandle) -> VmResult<f64> {
    let a = Frame { ctx, sp };
    let (e, n) = (a.p(0), a.p(1));
    let p = 2.0 / e;
    let inv_n = 1.0 / n;
    let xy = a.x().abs().powf(p) + a.y().abs().powf(p);
    Ok(1.0 - (xy.powf(e * inv_n) + a.z().abs().powf(2.0 * inv_n)).powf(n * 0.5))
}

// ── Vector traps ─────────────────────────────────────────────────────

/// Affine point transform attached to an `f_transform` function as private data.
#[derive(Debug, Clone, PartialEq)]
pub struct Transform {
    /// Row-major 3x4 matrix; the last column is the translation.
    pub matrix: [[f64; 4]; 3],
}

impl Transform {
    pub fn identity() -> Self {
        Transform { matrix: [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]] }
    }

    pub fn translate(x: f64, y: f64, z: f64) -> Self {
        let mut t = Transform::identity();
        t.matrix[0][3] = x;
        t.matrix[1][3] = y;
        t.matrix[2][3] = z;
        t
    }

    pub fn scale(x: f64, y: f64, z: f64) -> Self {
        let mut t = Transform::identity();
        t.matrix[0][0] = x;
        t.matrix[1][1] = y;
        t.matrix[2][2] = z;
        t
    }

    pub fn apply(&self, p: [f64; 3]) -> [f64; 3] {
        let row = |r: &[f64; 4]| r[0] * p[0] + r[1] * p[1] + r[2] * p[2] + r[3];
        [row(&self.matrix[0]), row(&self.matrix[1]), row(&self.matrix[2])]
    }
}

fn f_transform(ctx: &mut FPUContext<'_>, sp: usize, func: FunctionHandle) -> VmResult<()> {
    let point = [ctx.get_local(sp + 3), ctx.get_local(sp + 4), ctx.get_local(sp + 5)];
    let result = match ctx.vm().function(func)?.private::<Transform>() {
        Some(t) => t.apply(point),
        None => [0.0; 3],
    };
    for (i, v) in result.into_iter().enumerate() {
        ctx.set_local(sp + i, v);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve_to_tables() {
        assert_eq!(find_trap("f_sphere"), Some(TrapId::Scalar(3)));
        assert_eq!(find_trap("f_transform"), Some(TrapId::Vector(0)));
        assert_eq!(find_trap("f_nothing"), None);
    }

    #[test]
    fn transform_applies_translation_and_scale() {
        assert_eq!(Transform::translate(1.0, 2.0, 3.0).apply([1.0, 1.0, 1.0]), [2.0, 3.0, 4.0]);
        assert_eq!(Transform::scale(2.0, 0.5, -1.0).apply([1.0, 4.0, 3.0]), [2.0, 2.0, -3.0]);
    }
}
