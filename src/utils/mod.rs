pub mod cte_naming;
