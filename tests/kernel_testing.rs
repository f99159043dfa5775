use paste::paste;
use whisper_runtime::{Executor, ExecutorConfig};
mod common;
mod kernel_tests;
use kernel_tests::arith::*;
use kernel_tests::sequences::*;
use kernel_tests::shapes::*;

fn run_sequential_test(test: impl FnOnce(&Executor)) {
    test(&common::default_executor())
}

fn run_parallel_test(test: impl FnOnce(&Executor)) {
    let executor = common::executor(ExecutorConfig {
        parallel: true,
        validate_types: true,
        ..Default::default()
    });
    test(&executor)
}

macro_rules! do_test {
    ($runner_fn:expr, $runner_name:ident, $test_name:ident) => {
        paste! {
            #[allow(non_snake_case)]
            #[test]
            fn [<$runner_name _ $test_name>]() {
                $runner_fn($test_name);
            }
        }
    };
}

macro_rules! do_tests {
    ($runner_fn:expr, $runner_name:ident) => {
        do_test!($runner_fn, $runner_name, test_add_broadcast);
        do_test!($runner_fn, $runner_name, test_add_f16);
        do_test!($runner_fn, $runner_name, test_div_integer_by_zero);
        do_test!($runner_fn, $runner_name, test_mod_floored);
        do_test!($runner_fn, $runner_name, test_mod_fmod);
        do_test!($runner_fn, $runner_name, test_sum_variadic);
        do_test!($runner_fn, $runner_name, test_matmul);
        do_test!($runner_fn, $runner_name, test_matmul_batched);
        do_test!($runner_fn, $runner_name, test_gemm_trans_b_with_bias);
        do_test!($runner_fn, $runner_name, test_softmax);
        do_test!($runner_fn, $runner_name, test_where);
        do_test!($runner_fn, $runner_name, test_compare_and_not);
        do_test!($runner_fn, $runner_name, test_reduce_mean_keepdims);
        do_test!($runner_fn, $runner_name, test_reshape_copy_and_infer);
        do_test!($runner_fn, $runner_name, test_transpose_default_reverses);
        do_test!($runner_fn, $runner_name, test_concat_axis_1);
        do_test!($runner_fn, $runner_name, test_split_with_sizes);
        do_test!($runner_fn, $runner_name, test_split_even);
        do_test!($runner_fn, $runner_name, test_squeeze_unsqueeze);
        do_test!($runner_fn, $runner_name, test_slice_negative_step);
        do_test!($runner_fn, $runner_name, test_gather_axis_1);
        do_test!($runner_fn, $runner_name, test_expand);
        do_test!($runner_fn, $runner_name, test_range);
        do_test!($runner_fn, $runner_name, test_constant_of_shape);
        do_test!($runner_fn, $runner_name, test_shape_window_and_size);
        do_test!($runner_fn, $runner_name, test_flatten);
        do_test!($runner_fn, $runner_name, test_cast_int_to_float);
        do_test!($runner_fn, $runner_name, test_sequence_construct_at_length);
        do_test!($runner_fn, $runner_name, test_sequence_insert_erase);
        do_test!($runner_fn, $runner_name, test_concat_from_sequence);
        do_test!($runner_fn, $runner_name, test_optional_roundtrip);
    };
}

do_tests!(run_sequential_test, sequential);
do_tests!(run_parallel_test, parallel);
